//! Typed snapshots of HTML forms.
//!
//! A [`FormSnapshot`] captures what a browser would submit for a `<form>`:
//! its action, method and the successful controls in document order. Changes
//! are applied as pure [`FieldPatch`] lists that return a new snapshot, so a
//! snapshot parsed once can be replayed with different criteria.

use http::Method;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use super::dom::{compile_selector, text_of};
use crate::transport::{Credentials, FormBody, RequestOptions};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("form has no field named '{0}'")]
    FieldNotFound(String),
    #[error("field '{field}' has no option labelled '{label}'")]
    OptionNotFound { field: String, label: String },
    #[error("field '{0}' is not a select control")]
    NotASelect(String),
    #[error("form action '{action}' cannot be resolved against {base}")]
    InvalidAction { action: String, base: Url },
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Hidden,
    Password,
    Checkbox,
    Radio,
    Submit,
    Select { multiple: bool },
    TextArea,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    /// Trimmed display text.
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub value: String,
    /// Checkbox/radio state; always `true` for other kinds.
    pub checked: bool,
    pub options: Vec<SelectOption>,
}

impl FormField {
    fn hidden(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Hidden,
            value: value.to_string(),
            checked: true,
            options: Vec::new(),
        }
    }

    fn is_select(&self) -> bool {
        matches!(self.kind, FieldKind::Select { .. })
    }

    /// Values this control contributes to a submission.
    fn submitted_values(&self) -> Vec<&str> {
        match &self.kind {
            FieldKind::Checkbox | FieldKind::Radio if !self.checked => Vec::new(),
            FieldKind::Select { multiple } => {
                let selected: Vec<&str> = self
                    .options
                    .iter()
                    .filter(|opt| opt.selected)
                    .map(|opt| opt.value.as_str())
                    .collect();
                if !selected.is_empty() {
                    if *multiple { selected } else { selected[selected.len() - 1..].to_vec() }
                } else if *multiple {
                    Vec::new()
                } else {
                    self.options.first().map(|opt| vec![opt.value.as_str()]).unwrap_or_default()
                }
            }
            _ => vec![self.value.as_str()],
        }
    }
}

/// Override applied to a snapshot by [`FormSnapshot::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch {
    /// Set a field's value, adding a hidden field when the form has none.
    Value { name: String, value: String },
    /// Choose a select option by its visible label.
    OptionLabel { name: String, label: String },
}

impl FieldPatch {
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        FieldPatch::Value {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn option_label(name: impl Into<String>, label: impl Into<String>) -> Self {
        FieldPatch::OptionLabel {
            name: name.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSnapshot {
    pub name: Option<String>,
    pub id: Option<String>,
    /// Raw `action` attribute; empty means the document URL.
    pub action: String,
    pub method: Method,
    pub fields: Vec<FormField>,
}

const CONTROL_CSS: &str = "input, select, textarea, button";

impl FormSnapshot {
    pub fn from_element(form: ElementRef<'_>) -> Self {
        let attrs = form.value();
        let method = match attrs.attr("method").map(|m| m.trim().to_ascii_uppercase()) {
            Some(m) if m == "POST" => Method::POST,
            _ => Method::GET,
        };

        let mut fields = Vec::new();
        if let Ok(controls) = Selector::parse(CONTROL_CSS) {
            for control in form.select(&controls) {
                if let Some(field) = parse_control(control) {
                    fields.push(field);
                }
            }
        }

        Self {
            name: attrs.attr("name").map(str::to_string),
            id: attrs.attr("id").map(str::to_string),
            action: attrs.attr("action").unwrap_or_default().trim().to_string(),
            method,
            fields,
        }
    }

    pub fn all(document: &Html) -> Vec<Self> {
        match Selector::parse("form") {
            Ok(forms) => document.select(&forms).map(Self::from_element).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn first(document: &Html) -> Option<Self> {
        Self::all(document).into_iter().next()
    }

    pub fn by_name(document: &Html, name: &str) -> Option<Self> {
        Self::all(document)
            .into_iter()
            .find(|form| form.name.as_deref() == Some(name))
    }

    pub fn by_id(document: &Html, id: &str) -> Option<Self> {
        Self::all(document)
            .into_iter()
            .find(|form| form.id.as_deref() == Some(id))
    }

    /// First `<form>` matched by a CSS selector such as `#jikanwariSearchForm`.
    pub fn by_selector(document: &Html, css: &str) -> Result<Option<Self>, FormError> {
        let selector = compile_selector(css)?;
        Ok(document
            .select(&selector)
            .find(|el| el.value().name() == "form")
            .map(Self::from_element))
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Return a new snapshot with every patch applied in order.
    pub fn apply(&self, patches: &[FieldPatch]) -> Result<Self, FormError> {
        let mut next = self.clone();
        for patch in patches {
            match patch {
                FieldPatch::Value { name, value } => next.set_value(name, value),
                FieldPatch::OptionLabel { name, label } => next.choose_label(name, label)?,
            }
        }
        Ok(next)
    }

    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.set_value(name, value);
        self
    }

    pub fn select_by_label(mut self, name: &str, label: &str) -> Result<Self, FormError> {
        self.choose_label(name, label)?;
        Ok(self)
    }

    /// Keep only the named submit button; other submit buttons are dropped.
    pub fn with_submitter(mut self, name: &str) -> Self {
        self.fields
            .retain(|field| field.kind != FieldKind::Submit || field.name == name);
        self
    }

    /// Name/value pairs in document order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .flat_map(|field| {
                field
                    .submitted_values()
                    .into_iter()
                    .map(|value| (field.name.clone(), value.to_string()))
            })
            .collect()
    }

    pub fn to_body(&self) -> FormBody {
        FormBody::from_pairs(self.to_pairs())
    }

    pub fn resolve_action(&self, base: &Url) -> Result<Url, FormError> {
        if self.action.is_empty() {
            return Ok(base.clone());
        }
        base.join(&self.action).map_err(|_| FormError::InvalidAction {
            action: self.action.clone(),
            base: base.clone(),
        })
    }

    /// Target URL and options for submitting this form from `base`.
    pub fn submission(&self, base: &Url, credentials: Credentials) -> Result<(Url, RequestOptions), FormError> {
        let url = self.resolve_action(base)?;
        Ok((url, RequestOptions::submit(self.method.clone(), self.to_body(), credentials)))
    }

    fn set_value(&mut self, name: &str, value: &str) {
        let group: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name == name)
            .map(|(idx, _)| idx)
            .collect();

        let Some(&first) = group.first() else {
            self.fields.push(FormField::hidden(name, value));
            return;
        };

        match self.fields[first].kind {
            FieldKind::Radio | FieldKind::Checkbox => {
                let matching = group.iter().copied().find(|&idx| self.fields[idx].value == value);
                for &idx in &group {
                    self.fields[idx].checked = false;
                }
                let target = matching.unwrap_or(first);
                self.fields[target].value = value.to_string();
                self.fields[target].checked = true;
            }
            FieldKind::Select { .. } => {
                let field = &mut self.fields[first];
                let known = field.options.iter().any(|opt| opt.value == value);
                for opt in field.options.iter_mut() {
                    opt.selected = opt.value == value;
                }
                if !known {
                    field.options.push(SelectOption {
                        value: value.to_string(),
                        label: value.to_string(),
                        selected: true,
                    });
                }
            }
            _ => self.fields[first].value = value.to_string(),
        }
    }

    fn choose_label(&mut self, name: &str, label: &str) -> Result<(), FormError> {
        let field = self
            .fields
            .iter_mut()
            .find(|field| field.name == name)
            .ok_or_else(|| FormError::FieldNotFound(name.to_string()))?;
        if !field.is_select() {
            return Err(FormError::NotASelect(name.to_string()));
        }

        let wanted = label.trim();
        let position = field
            .options
            .iter()
            .position(|opt| opt.label == wanted)
            .ok_or_else(|| FormError::OptionNotFound {
                field: name.to_string(),
                label: label.to_string(),
            })?;
        for (idx, opt) in field.options.iter_mut().enumerate() {
            opt.selected = idx == position;
        }
        Ok(())
    }
}

fn parse_control(control: ElementRef<'_>) -> Option<FormField> {
    let attrs = control.value();
    if attrs.attr("disabled").is_some() {
        return None;
    }
    let name = attrs.attr("name").filter(|n| !n.is_empty())?.to_string();
    let value = attrs.attr("value").unwrap_or_default().to_string();

    let field = |kind, value| FormField {
        name: name.clone(),
        kind,
        value,
        checked: true,
        options: Vec::new(),
    };

    match attrs.name() {
        "select" => {
            let options = Selector::parse("option")
                .map(|sel| {
                    control
                        .select(&sel)
                        .filter(|opt| opt.value().attr("disabled").is_none())
                        .map(|opt| {
                            let label = text_of(opt).trim().to_string();
                            SelectOption {
                                value: opt.value().attr("value").map(str::to_string).unwrap_or_else(|| label.clone()),
                                label,
                                selected: opt.value().attr("selected").is_some(),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(FormField {
                options,
                ..field(
                    FieldKind::Select {
                        multiple: attrs.attr("multiple").is_some(),
                    },
                    String::new(),
                )
            })
        }
        "textarea" => Some(field(FieldKind::TextArea, text_of(control))),
        "button" => {
            let kind = attrs.attr("type").unwrap_or("submit").to_ascii_lowercase();
            (kind == "submit").then(|| field(FieldKind::Submit, value))
        }
        _ => {
            let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "hidden" => Some(field(FieldKind::Hidden, value)),
                "password" => Some(field(FieldKind::Password, value)),
                "submit" => Some(field(FieldKind::Submit, value)),
                "checkbox" | "radio" => {
                    let value = attrs.attr("value").unwrap_or("on").to_string();
                    Some(FormField {
                        checked: attrs.attr("checked").is_some(),
                        ..field(
                            if kind == "checkbox" { FieldKind::Checkbox } else { FieldKind::Radio },
                            value,
                        )
                    })
                }
                "button" | "reset" | "image" | "file" => None,
                _ => Some(field(FieldKind::Text, value)),
            }
        }
    }
}
