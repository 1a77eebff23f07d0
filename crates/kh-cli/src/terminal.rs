//! Passphrase entry on the controlling terminal
//!
//! Reads without echo in raw mode. When stdin is not a terminal the first
//! line of stdin is used instead, so scripts can pipe a passphrase in.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use zeroize::Zeroizing;

/// Prompt for a passphrase; `None` if the user cancelled
pub fn read_passphrase(prompt: &str) -> Result<Option<Zeroizing<String>>> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return read_line(stdin.lock());
    }

    enable_raw_mode()?;
    let result = read_hidden();
    disable_raw_mode()?;
    eprintln!();
    result
}

fn read_hidden() -> Result<Option<Zeroizing<String>>> {
    let mut passphrase = Zeroizing::new(String::new());
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        let control = modifiers.contains(KeyModifiers::CONTROL);
        match code {
            KeyCode::Enter => return Ok(Some(passphrase)),
            KeyCode::Esc => return Ok(None),
            KeyCode::Char('c') | KeyCode::Char('d') if control => return Ok(None),
            KeyCode::Char('u') if control => passphrase.clear(),
            KeyCode::Backspace => {
                passphrase.pop();
            }
            KeyCode::Char(c) => passphrase.push(c),
            _ => {}
        }
    }
}

/// One line without its line ending; `None` at end of input
pub fn read_line(mut reader: impl BufRead) -> Result<Option<Zeroizing<String>>> {
    let mut line = Zeroizing::new(String::new());
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(Some(line))
}
