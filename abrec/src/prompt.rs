//! Interactive stdin prompts used before any background work starts.

use std::io::Write;

use anyhow::{Context, bail};

/// Asks the user to pick one entry from a numbered list. Returns the chosen
/// entry. A single-entry list is returned without prompting.
pub fn choose<'a>(what: &str, options: &'a [String]) -> anyhow::Result<&'a String> {
    match options {
        [] => bail!("no {what} found"),
        [only] => Ok(only),
        _ => {
            println!("Multiple {what} found, please select one:");
            for (i, option) in options.iter().enumerate() {
                println!("{}. {option}", i + 1);
            }
            print!("> ");
            std::io::stdout().flush()?;

            let mut input = String::new();
            std::io::stdin()
                .read_line(&mut input)
                .context("failed to read selection")?;
            let index: usize = input
                .trim()
                .parse()
                .context("selection must be a number")?;
            options
                .get(index.checked_sub(1).unwrap_or(usize::MAX))
                .with_context(|| format!("selection must be between 1 and {}", options.len()))
        }
    }
}

/// Prompts for a playlist URL when none was passed on the command line.
pub fn read_url() -> anyhow::Result<String> {
    print!("Enter M3U8 playlist URL: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("failed to read URL")?;
    let url = input.trim().to_string();
    if url.is_empty() {
        bail!("no URL provided");
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_option_needs_no_input() {
        let options = vec!["finals".to_string()];
        assert_eq!(choose("events", &options).unwrap(), "finals");
    }

    #[test]
    fn empty_options_fail() {
        assert!(choose("events", &[]).is_err());
    }
}
