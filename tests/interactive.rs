use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use campusweb_rs::{ClientConfig, LoginCredentials, SearchQuery, Session, VERSION};
use tokio::runtime::Runtime;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_usize(input: &str, default: usize) -> usize {
    input.trim().parse().ok().filter(|value| *value > 0).unwrap_or(default)
}

fn read_code() -> u32 {
    loop {
        match prompt("One-time code:").map(|line| line.parse::<u32>()) {
            Ok(Ok(code)) => return code,
            Ok(Err(_)) => println!("Digits only, try again."),
            Err(err) => panic!("stdin closed: {err}"),
        }
    }
}

#[test]
#[ignore = "Requires network access, DUS_USERNAME/DUS_PASSWORD and manual input"]
fn interactive_syllabus_walk() -> Result<(), Box<dyn Error>> {
    println!("campusweb-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let credentials = LoginCredentials::from_env()?;

    let path_answer = prompt("Credential file [./credentials.json]:")?;
    let grade_answer = prompt("Grade label (e.g. 1年, blank for any):")?;
    let term_answer = prompt("Term label (e.g. 前学期, blank for any):")?;
    let limit_answer = prompt("References to print [5]:")?;

    let mut builder = ClientConfig::builder().with_proxy_from_env();
    if !path_answer.is_empty() {
        builder = builder.with_credentials_path(PathBuf::from(path_answer));
    }
    let session = Session::new(builder.build()?)?;

    let mut query = SearchQuery::new();
    if !grade_answer.is_empty() {
        query = query.grade(grade_answer);
    }
    if !term_answer.is_empty() {
        query = query.term(term_answer);
    }
    let limit = parse_usize(&limit_answer, 5);

    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let code_prompt = || async { tokio::task::spawn_blocking(read_code).await.unwrap_or(0) };
        let outcome = session.ensure_authenticated(&credentials, Some(&code_prompt)).await?;
        println!("\nLogin: {:?}", outcome);

        let mut walker = session.search(query);
        let mut printed = 0;
        while let Some(reference) = walker.next().await {
            let reference = reference?;
            println!("{:?}", reference.digest);
            printed += 1;
            if printed >= limit {
                break;
            }
        }
        println!(
            "\nPrinted {} reference(s) after {} search(es); {:?} page(s) in total.",
            printed,
            walker.search_replays(),
            walker.page_count()
        );
        Ok::<_, Box<dyn Error>>(())
    })?;

    println!("Interactive test complete. Re-run with different inputs as needed.");
    Ok(())
}
