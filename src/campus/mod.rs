//! CampusSquare navigation: login, menu flows, search listings and detail
//! pages, all driven by re-submitting the application's own HTML forms.

pub mod auth;
pub mod detail;
pub mod dom;
pub mod form;
pub mod handler;
pub mod listing;
pub mod menu;

pub use auth::{AuthError, AuthState, LoginOutcome, StepUpPrompt, is_logged_in, login};
pub use detail::{DetailError, DetailPage, collect_details, fetch_detail};
pub use form::{FieldKind, FieldPatch, FormError, FormField, FormSnapshot, SelectOption};
pub use handler::InlineCall;
pub use listing::{ListingError, ListingReference, ListingWalker, RoutingOptions, SearchQuery};
pub use menu::{MenuHandle, NavigationError, dispatch, fetch_menu};
