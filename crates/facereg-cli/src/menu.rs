//! Interactive console menu.

use std::io::{BufRead, Write};

/// What the menu can do on behalf of the user.
pub trait Actions {
    fn register(&mut self, name: &str, age: &str, out: &mut dyn Write) -> anyhow::Result<()>;
    fn recognize(&mut self, out: &mut dyn Write) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Register,
    Recognize,
    Exit,
}

pub fn parse_choice(input: &str) -> Option<Choice> {
    match input.trim() {
        "1" => Some(Choice::Register),
        "2" => Some(Choice::Recognize),
        "3" => Some(Choice::Exit),
        _ => None,
    }
}

/// Run the menu until the user picks exit or input ends.
///
/// A failing action is reported and the menu is shown again.
pub fn run<R, W, A>(input: &mut R, out: &mut W, actions: &mut A) -> std::io::Result<()>
where
    R: BufRead,
    W: Write,
    A: Actions,
{
    loop {
        writeln!(out, "\n--- MENU ---")?;
        writeln!(out, "1 - Register person")?;
        writeln!(out, "2 - Recognize person")?;
        writeln!(out, "3 - Exit")?;

        let Some(line) = prompt(input, out, "Choice: ")? else {
            break;
        };

        let result = match parse_choice(&line) {
            Some(Choice::Register) => {
                let Some(name) = prompt(input, out, "Name: ")? else {
                    break;
                };
                let Some(age) = prompt(input, out, "Age: ")? else {
                    break;
                };
                actions.register(&name, &age, out)
            }
            Some(Choice::Recognize) => actions.recognize(out),
            Some(Choice::Exit) => break,
            None => {
                writeln!(out, "Invalid option!")?;
                continue;
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "menu action failed");
            writeln!(out, "Error: {e:#}")?;
        }
    }

    tracing::debug!("menu closed");
    Ok(())
}

/// Print `label` and read one line; `None` at end of input.
fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
) -> std::io::Result<Option<String>> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
