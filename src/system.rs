use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

// Ctrl-C raises the flag; a running script is terminated when it sees it
pub fn install_interrupt_handler() -> Result<&'static AtomicBool> {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
        eprintln!("^C");
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(&INTERRUPTED)
}

// Put text on the system clipboard
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()
        .context("clipboard is not available; use --stdout to print instead")?;
    clipboard
        .set_text(text.to_owned())
        .context("failed to copy to clipboard")
}

// Ask a yes/no question; anything but y/yes is a no
pub fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{prompt} [y/N] ").context("failed to write prompt")?;
    output.flush().context("failed to write prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;

    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_confirm_accepts_yes() -> Result<()> {
        let mut output = Vec::new();
        assert!(confirm("Delete?", &mut Cursor::new("y\n"), &mut output)?);
        assert!(confirm("Delete?", &mut Cursor::new(" YES \r\n"), &mut output)?);
        assert!(String::from_utf8_lossy(&output).starts_with("Delete? [y/N] "));
        Ok(())
    }

    #[test]
    fn test_confirm_defaults_to_no() -> Result<()> {
        let mut output = Vec::new();
        assert!(!confirm("Delete?", &mut Cursor::new("\n"), &mut output)?);
        assert!(!confirm("Delete?", &mut Cursor::new("n\n"), &mut output)?);
        assert!(!confirm("Delete?", &mut Cursor::new("yep\n"), &mut output)?);
        // Closed stdin
        assert!(!confirm("Delete?", &mut Cursor::new(""), &mut output)?);
        Ok(())
    }
}
