use std::fs;
use std::io;
use std::path;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use filedrop_config::ParameterSource;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info};

use super::{FileState, StateKind, Transition};
use crate::context::FileContext;
use crate::dump::LogDump;
use crate::error::{StateError, StateResult};
use crate::folder::ParameterBinding;
use crate::transport::{RequestParameter, TransportError, TriggerRequest};

/// Payload of the entry appended when the target could not be resolved.
const NOT_SENT: u8 = 1;

/// Sends the folder's remote method for the staged file.
#[derive(Debug, Default)]
pub struct Trigger {
    pub(super) executed: bool,
    pub(super) succeeded: bool,
    pub(super) previous: Option<Box<FileState>>,
}

impl Trigger {
    pub(crate) fn execute(&mut self, ctx: &mut FileContext) -> StateResult<Transition> {
        if self.executed && self.succeeded {
            return Ok(Transition::Next(StateKind::Finished));
        }
        let can_retry = ctx.folder.trigger.can_retry;
        if self.executed && !can_retry {
            return Err(StateError::abort(
                "trigger was already sent and probably failed",
            ));
        }

        let request = build_request(ctx)?;
        ctx.log_start(StateKind::Trigger, &[], false)?;
        self.executed = true;

        let started = Instant::now();
        let outcome = ctx.env.transport.submit(&request);
        ctx.env.metrics.observe_trigger(started.elapsed());

        match outcome {
            Ok(()) => {
                info!(
                    file_id = ?ctx.file_id,
                    method = %request.method,
                    path = %ctx.current_file.display(),
                    "trigger sent"
                );
                self.succeeded = true;
                ctx.log_finish()?;
                Ok(Transition::Next(StateKind::Finished))
            }
            Err(err @ TransportError::Unresolved(_)) => {
                // The server never ran the request; a restart may send it again.
                ctx.log_start(StateKind::Trigger, &[NOT_SENT], true)?;
                self.executed = false;
                Err(StateError::retry_block_input("trigger target could not be resolved").with_source(err))
            }
            Err(err) if can_retry => Err(StateError::retry("trigger failed").with_source(err)),
            Err(err) => Err(StateError::abort("trigger failed").with_source(err)),
        }
    }

    /// A logged entry means the request was sent; a finished one means it
    /// succeeded. A `NOT_SENT` entry undoes the one before it.
    pub(crate) fn read_payload(
        &mut self,
        input: &mut &[u8],
        finished: bool,
        dump: Option<&mut LogDump>,
    ) -> io::Result<()> {
        let not_sent = input.first() == Some(&NOT_SENT);
        if not_sent {
            *input = &input[1..];
        }
        self.executed = !not_sent;
        self.succeeded = finished && !not_sent;
        if not_sent && let Some(dump) = dump {
            dump.element("outcome", "target unresolved")?;
        }
        Ok(())
    }
}

fn build_request(ctx: &FileContext) -> StateResult<TriggerRequest> {
    let trigger = &ctx.folder.trigger;
    let mut parameters = Vec::with_capacity(trigger.parameters.len());
    for parameter in &trigger.parameters {
        let value = match &parameter.binding {
            ParameterBinding::Static(value) => RequestParameter::text(&parameter.name, value),
            ParameterBinding::Derived(source) => derive(ctx, &parameter.name, *source)?,
            ParameterBinding::ConfiguredFolder(name) => {
                let location = ctx.env.folders.location_of(name).ok_or_else(|| {
                    StateError::retry(format!("configured folder {name} is unknown"))
                })?;
                let location = path::absolute(location).map_err(|err| {
                    StateError::retry(format!("cannot resolve {}", location.display())).with_source(err)
                })?;
                RequestParameter::text(&parameter.name, location.to_string_lossy())
            }
        };
        parameters.push(value);
    }

    debug!(file_id = ?ctx.file_id, parameters = parameters.len(), "trigger request built");
    Ok(TriggerRequest {
        method: trigger.method.clone(),
        namespace: trigger.namespace.clone(),
        organization: trigger.organization.clone(),
        user: trigger.user.clone(),
        parameters,
    })
}

fn derive(ctx: &FileContext, name: &str, source: ParameterSource) -> StateResult<RequestParameter> {
    let file = &ctx.current_file;
    let read_failure = |err: std::io::Error| {
        StateError::retry(format!("cannot read {} for parameter {name}", file.display())).with_source(err)
    };

    Ok(match source {
        ParameterSource::Filename => {
            let file_name = ctx
                .original_file
                .file_name()
                .ok_or_else(|| StateError::retry("original file has no name"))?;
            RequestParameter::text(name, file_name.to_string_lossy())
        }
        ParameterSource::Filepath => {
            let absolute = path::absolute(file).map_err(read_failure)?;
            RequestParameter::text(name, absolute.to_string_lossy())
        }
        ParameterSource::Filesize => {
            let size = fs::metadata(file).map_err(read_failure)?.len();
            RequestParameter::text(name, size.to_string())
        }
        ParameterSource::ContentText => {
            RequestParameter::text(name, fs::read_to_string(file).map_err(read_failure)?)
        }
        ParameterSource::ContentBase64 => {
            let bytes = fs::read(file).map_err(read_failure)?;
            RequestParameter::text(name, STANDARD.encode(bytes))
        }
        ParameterSource::ContentXml => {
            let text = fs::read_to_string(file).map_err(read_failure)?;
            check_xml(&text).map_err(|reason| {
                StateError::retry(format!("{} is not well-formed XML: {reason}", file.display()))
            })?;
            RequestParameter::xml(name, text)
        }
        ParameterSource::ConfiguredFolder => {
            return Err(StateError::internal(format!(
                "parameter {name} has no configured folder"
            )));
        }
    })
}

/// Accept a document with exactly one root element and balanced tags.
fn check_xml(text: &str) -> Result<(), String> {
    let mut reader = Reader::from_str(text);
    let mut depth = 0_usize;
    let mut roots = 0_usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) if depth == 0 => roots += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Text(text)) if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) => {
                return Err("text outside the root element".to_string());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(err.to_string()),
        }
    }
    match (roots, depth) {
        (1, 0) => Ok(()),
        (0, _) => Err("no root element".to_string()),
        (_, 0) => Err("several root elements".to_string()),
        _ => Err("unclosed element".to_string()),
    }
}
