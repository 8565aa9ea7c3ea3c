//! Document review demo
//!
//! A content creator drafts a short guide containing a code sample, a validator checks the
//! sample through a registered capability, and a user signs off once the sample is clean.
//!
//! - Messages containing a fenced code block are routed to the validator.
//! - The validator's verdict always goes to the user.
//! - Everything else falls back to round-robin, which hands the floor back to the creator.
//! - The conversation ends when the user writes APPROVED, or after ten turns.
//!
//! Run with: RUST_LOG=groupchat=debug cargo run --example document_review

use futures_util::StreamExt;
use groupchat::agent::{AgentFn, AgentFuture, AgentResponse, AgentResult, FnAgent, TokenUsage};
use groupchat::history::HistorySnapshot;
use groupchat::registry::{CapabilityRegistry, CapabilitySchema, ParameterSpec, ParameterType};
use groupchat::runtime::Runtime;
use groupchat::selection::{ContentRoutedSelection, RoutingRule};
use groupchat::termination::{CompositeTermination, KeywordTermination, MaxTurnsTermination};
use groupchat::Orchestrator;
use serde_json::json;
use std::sync::Arc;

const FIRST_DRAFT: &str = "# Greeting guide\n\nPrint a greeting like this:\n\n```python\nprint(\"hello, world\"\n```\n";
const SECOND_DRAFT: &str = "# Greeting guide\n\nPrint a greeting like this:\n\n```python\nprint(\"hello, world\")\n```\n\nThe call writes one line to standard output.";

/// Body of the first fenced block in `text`, if any.
fn extract_code(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].to_string())
}

/// Reports the first unbalanced bracket in `code`.
fn check_brackets(code: &str) -> Result<(), String> {
    let mut open = Vec::new();
    for (line_no, line) in code.lines().enumerate() {
        for c in line.chars() {
            match c {
                '(' | '[' | '{' => open.push((c, line_no + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match open.pop() {
                        Some((o, _)) if o == expected => {}
                        _ => return Err(format!("unexpected '{}' on line {}", c, line_no + 1)),
                    }
                }
                _ => {}
            }
        }
    }
    match open.pop() {
        Some((c, line)) => Err(format!("'{}' opened on line {} is never closed", c, line)),
        None => Ok(()),
    }
}

fn build_registry() -> Result<CapabilityRegistry, Box<dyn std::error::Error>> {
    let mut registry = CapabilityRegistry::new();
    registry.register_sync(
        CapabilitySchema::new("check_code", "Checks a code sample for unbalanced brackets")
            .with_parameter(
                ParameterSpec::new("code", ParameterType::String)
                    .with_description("The code sample to check")
                    .required(),
            ),
        |args| {
            let code = args["code"].as_str().unwrap_or_default();
            Ok(match check_brackets(code) {
                Ok(()) => json!({ "valid": true }),
                Err(problem) => json!({ "valid": false, "problem": problem }),
            })
        },
    )?;
    Ok(registry)
}

async fn validate_latest(registry: Arc<CapabilityRegistry>, history: HistorySnapshot) -> AgentResult {
    let code = history
        .last()
        .and_then(|m| extract_code(&m.content))
        .unwrap_or_default();
    let report = registry.call("check_code", json!({ "code": code })).await?;

    let verdict = if report["valid"].as_bool().unwrap_or(false) {
        "The code sample is valid.".to_string()
    } else {
        format!(
            "The code sample is invalid: {}.",
            report["problem"].as_str().unwrap_or("unknown problem")
        )
    };
    Ok(AgentResponse::new(verdict).with_metadata("capability", "check_code"))
}

fn content_creator() -> FnAgent {
    FnAgent::from_sync("ContentCreator", |history| {
        let drafts = history.iter().filter(|m| m.is_authored_by("ContentCreator")).count();
        let draft = if drafts == 0 { FIRST_DRAFT } else { SECOND_DRAFT };
        Ok(AgentResponse::new(draft).with_tokens(TokenUsage::new(history.len() * 40, 60)))
    })
    .with_description("Writes and revises the guide")
}

fn code_validator(registry: Arc<CapabilityRegistry>) -> FnAgent {
    let func: AgentFn = Arc::new(move |history: HistorySnapshot| -> AgentFuture {
        Box::pin(validate_latest(Arc::clone(&registry), history))
    });
    FnAgent::new("CodeValidator", func).with_description("Checks every code sample")
}

fn user() -> FnAgent {
    FnAgent::from_sync("User", |history| {
        let clean = history
            .last_by("CodeValidator")
            .map(|m| m.content.contains("is valid"))
            .unwrap_or(false);
        let reply = if clean {
            "Reads well and the sample runs. APPROVED"
        } else {
            "Please fix the problem the validator found."
        };
        Ok(AgentResponse::new(reply))
    })
    .with_description("Signs off on the finished guide")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    groupchat::init_logger();

    let registry = Arc::new(build_registry()?);

    let mut chat = Orchestrator::new("document-review", "Document review")
        .with_selection(
            ContentRoutedSelection::new()
                .with_rule(RoutingRule::on_code_block("CodeValidator"))
                .with_rule(RoutingRule::after("CodeValidator", "User")),
        )
        .with_termination(
            CompositeTermination::any()
                .with(KeywordTermination::new("User", "APPROVED"))
                .with(MaxTurnsTermination::new(10)),
        );
    chat.add_agent(Arc::new(content_creator()))?;
    chat.add_agent(Arc::new(code_validator(Arc::clone(&registry))))?;
    chat.add_agent(Arc::new(user()))?;

    let outcome = Runtime::scoped(|runtime| async move {
        let mut run = runtime.run(chat, "Write a short guide showing how to print a greeting.")?;
        while let Some(message) = run.next().await {
            println!("==== {} just responded ====", message.author);
            println!("{}\n", message.content);
        }
        run.outcome().await
    })
    .await??;

    println!(
        "Finished after {} turn(s): {} ({} tokens)",
        outcome.turns, outcome.reason, outcome.total_tokens_used
    );
    println!(
        "check_code was called {} time(s)",
        registry.call_count("check_code").unwrap_or(0)
    );

    let guide = outcome.final_result_from("ContentCreator")?;
    println!("\n==== Final guide ====\n{}", guide.content);
    Ok(())
}
