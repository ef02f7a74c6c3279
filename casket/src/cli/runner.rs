// casket/src/cli/runner.rs
//! Runs one operation per cask and reports a tally at the end.
use casket_common::error::{CasketError, Result};
use colored::Colorize;
use tracing::{debug, error};

/// Applies `op` to every token in order. A failure for one cask never stops
/// the others; the returned error summarises how many failed.
pub fn run_each<F>(tokens: &[String], verb: &str, mut op: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut failures: Vec<(String, CasketError)> = Vec::new();

    for token in tokens {
        debug!("{} {}", verb, token);
        if let Err(e) = op(token) {
            error!("✖ {} {}: {}", verb, token.cyan(), e);
            failures.push((token.clone(), e));
        }
    }

    let succeeded = tokens.len() - failures.len();
    if failures.is_empty() {
        if tokens.len() > 1 {
            println!("{} {} {} casks", "✓".green(), verb, succeeded);
        }
        return Ok(());
    }

    eprintln!(
        "\n{}: {} succeeded, {} failed",
        format!("Finished with errors ({verb})").yellow(),
        succeeded,
        failures.len()
    );
    for (token, e) in &failures {
        eprintln!("Cask '{}':", token.cyan());
        eprintln!("- {}", e.to_string().red());
    }
    Err(CasketError::CaskError(format!(
        "{} of {} casks failed",
        failures.len(),
        tokens.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_token_is_attempted() {
        let tokens = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut seen = Vec::new();
        let result = run_each(&tokens, "Testing", |token| {
            seen.push(token.to_string());
            if token == "b" {
                Err(CasketError::CaskUnavailable(token.to_string(), "gone".to_string()))
            } else {
                Ok(())
            }
        });

        assert_eq!(seen, tokens);
        assert!(result.unwrap_err().to_string().contains("1 of 3 casks failed"));
    }

    #[test]
    fn all_successes_return_ok() {
        let tokens = vec!["a".to_string()];
        assert!(run_each(&tokens, "Testing", |_| Ok(())).is_ok());
    }
}
