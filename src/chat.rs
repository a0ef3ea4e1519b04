// Terminal front end: the project form as a sequence of questions, then a
// chat loop with a few slash commands for parameters.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::consultant::Consultant;
use crate::error::SessionError;
use crate::parameters::{InputKind, ParamField, ProjectForm};

const HELP: &str = "Commands: /params shows the project, /edit <field> changes one, /help, /quit";

struct Console<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn say(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    // None on end of input.
    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        self.writer.write_all(question.as_bytes()).await?;
        self.writer.write_all(b" ").await?;
        self.writer.flush().await?;
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// Accepts either an option's number in the list or its text.
fn resolve_option(field: ParamField, answer: &str) -> String {
    answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| field.options().get(i))
        .map(|option| option.to_string())
        .unwrap_or_else(|| answer.to_string())
}

fn question_for(field: ParamField) -> String {
    match field.input_kind() {
        InputKind::Number => format!("{} (sq. ft.):", field.label()),
        InputKind::Text => format!("{} (optional):", field.label()),
        InputKind::Select => {
            let options = field
                .options()
                .iter()
                .enumerate()
                .map(|(i, option)| format!("{}) {}", i + 1, option))
                .collect::<Vec<_>>()
                .join("  ");
            format!("{} [{}]:", field.label(), options)
        }
    }
}

async fn collect_form<R, W>(console: &mut Console<R, W>) -> Result<Option<ProjectForm>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut form = ProjectForm::default();
    for field in ParamField::ALL {
        loop {
            let Some(answer) = console.ask(&question_for(field)).await? else {
                return Ok(None);
            };
            let answer = if field.input_kind() == InputKind::Select {
                resolve_option(field, &answer)
            } else {
                answer
            };
            match field.normalize(&answer) {
                Ok(Some(value)) => {
                    set_form_field(&mut form, field, value);
                    break;
                }
                Ok(None) => console.say(&format!("{} is required", field.label())).await?,
                Err(e) => {
                    for message in e.errors.values() {
                        console.say(message).await?;
                    }
                }
            }
        }
    }

    loop {
        let Some(answer) = console.ask("Your first question:").await? else {
            return Ok(None);
        };
        if !answer.is_empty() {
            form.first_query = Some(answer);
            return Ok(Some(form));
        }
        console.say("First Question is required").await?;
    }
}

fn set_form_field(form: &mut ProjectForm, field: ParamField, value: String) {
    let slot = match field {
        ParamField::PlotSize => &mut form.plot_size,
        ParamField::ConstructionType => &mut form.construction_type,
        ParamField::Stories => &mut form.stories,
        ParamField::HouseType => &mut form.house_type,
        ParamField::FoundationType => &mut form.foundation_type,
        ParamField::RoofType => &mut form.roof_type,
        ParamField::SpecialRequirements => &mut form.special_requirements,
    };
    *slot = Some(value);
}

/// Runs one consultation over the given reader and writer until `/quit` or
/// end of input.
pub async fn run_chat<R, W>(consultant: Arc<Consultant>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut console = Console { reader, writer };
    console
        .say("Welcome to your steel construction consultant. Tell me about the project.")
        .await?;

    let Some(form) = collect_form(&mut console).await? else {
        info!("Input closed before the project form was complete");
        return Ok(());
    };

    let id = consultant
        .open_session(&form)
        .await
        .context("Failed to open consultation session")?;

    console.say("AI is thinking...").await?;
    if let Some(reply) = consultant.send_first_query(id).await? {
        console.say(&reply.content).await?;
    }
    console.say(HELP).await?;

    loop {
        let Some(line) = console.ask(">").await? else {
            break;
        };
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line.as_str(), ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) | ("/exit", _) => break,
            ("/help", _) => console.say(HELP).await?,
            ("/params", _) => {
                let view = consultant.view(id)?;
                for field in ParamField::ALL {
                    console
                        .say(&format!(
                            "{}: {}",
                            field.label(),
                            view.parameters.display_value(field)
                        ))
                        .await?;
                }
            }
            ("/edit", name) => edit_parameter(&consultant, id, name, &mut console).await?,
            _ => {
                console.say("AI is thinking...").await?;
                match consultant.submit_message(id, &line).await {
                    Ok(reply) => console.say(&reply.content).await?,
                    Err(SessionError::Busy) => {
                        console.say("Please wait for the current answer.").await?
                    }
                    Err(e) => return Err(e).context("Chat message failed"),
                }
            }
        }
    }

    consultant.close_session(id);
    info!("Chat session finished");
    Ok(())
}

async fn edit_parameter<R, W>(
    consultant: &Consultant,
    id: uuid::Uuid,
    name: &str,
    console: &mut Console<R, W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let field = match name.parse::<ParamField>() {
        Ok(field) => field,
        Err(e) => {
            let keys = ParamField::ALL.map(ParamField::key).join(", ");
            console.say(&format!("{}. Fields: {}", e, keys)).await?;
            return Ok(());
        }
    };

    let edit = consultant.open_edit(id, field)?;
    console
        .say(&format!("Current {}: {}", field.label(), edit.pending_value))
        .await?;
    let answer = console
        .ask(&format!("New {} (blank to cancel)", question_for(field)))
        .await?
        .unwrap_or_default();

    if answer.is_empty() {
        consultant.cancel_edit(id)?;
        return Ok(());
    }

    let value = if field.input_kind() == InputKind::Select {
        resolve_option(field, &answer)
    } else {
        answer
    };
    consultant.set_edit_value(id, value)?;
    match consultant.save_edit(id).await {
        Ok(Some(message)) => console.say(&message.content).await?,
        Ok(None) => console.say("Nothing changed.").await?,
        Err(SessionError::Validation(e)) => {
            warn!("Rejected parameter edit: {}", e);
            consultant.cancel_edit(id)?;
            for message in e.errors.values() {
                console.say(message).await?;
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_option_by_number_or_text() {
        assert_eq!(resolve_option(ParamField::RoofType, "2"), "Hip");
        assert_eq!(resolve_option(ParamField::RoofType, "Flat"), "Flat");
        assert_eq!(resolve_option(ParamField::RoofType, "0"), "0");
        assert_eq!(resolve_option(ParamField::RoofType, "99"), "99");
    }

    #[test]
    fn test_select_question_lists_options() {
        let question = question_for(ParamField::Stories);
        assert!(question.starts_with("Number of Stories"));
        assert!(question.contains("5) 5+"));
    }
}
