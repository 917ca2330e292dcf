//! CommandProcessor - runs one store command per message
//!
//! Either a fixed operator (`keys`, `scard`, `sadd`, `incrby`) applied to a
//! key template, or a generic command template with arguments from a mapping.
//! Each message is processed independently; a failure is attached to that
//! message and the rest of the batch still runs.

use std::sync::Arc;

use contracts::{
    Batch, BatchWriter, Command, CommandArg, CommandClient, ContractError, FailureGranularity,
    Message, OperatorKind, RedisOutputConfig,
};
use interpolation::{ArgsMapping, InterpolatedField};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::dispatch::{BatchDispatcher, ItemAction};
use crate::retry::RetryPolicy;

enum Mode {
    Operator {
        operator: OperatorKind,
        key: InterpolatedField,
    },
    Command {
        command: InterpolatedField,
        args: Option<ArgsMapping>,
    },
}

/// Per-item command writer over a `CommandClient`
pub struct CommandProcessor<C> {
    name: String,
    client: Arc<C>,
    mode: Mode,
    retry: RetryPolicy,
    dispatcher: BatchDispatcher,
}

impl<C: CommandClient> CommandProcessor<C> {
    /// Compile templates and select the mode
    ///
    /// # Errors
    /// `ConfigValidation` unless exactly one of `operator` / `command` is set,
    /// `InvalidTemplate` for malformed templates
    pub fn new(
        name: impl Into<String>,
        config: &RedisOutputConfig,
        client: Arc<C>,
    ) -> Result<Self, ContractError> {
        let mode = match (config.operator, config.command.is_empty()) {
            (Some(_), false) => {
                return Err(ContractError::config_validation(
                    "command",
                    "cannot combine operator and command",
                ))
            }
            (Some(operator), true) => {
                let key = config.key.as_deref().ok_or_else(|| {
                    ContractError::config_validation("key", "required with operator")
                })?;
                Mode::Operator {
                    operator,
                    key: InterpolatedField::compile(key)?,
                }
            }
            (None, false) => Mode::Command {
                command: InterpolatedField::compile(&config.command)?,
                args: if config.args_mapping.trim().is_empty() {
                    None
                } else {
                    Some(ArgsMapping::compile(&config.args_mapping)?)
                },
            },
            (None, true) => {
                return Err(ContractError::config_validation(
                    "command",
                    "one of operator or command is required",
                ))
            }
        };

        let name = name.into();
        Ok(Self {
            dispatcher: BatchDispatcher::new(&name),
            name,
            client,
            mode,
            retry: RetryPolicy::new(config.retries, config.retry_period),
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_command(&self, index: usize, input: &Batch) -> Result<Command, ContractError> {
        match &self.mode {
            Mode::Operator { operator, key } => {
                let key = key.resolve_string(index, input);
                let content = input
                    .get(index)
                    .map(|m| m.as_bytes().clone())
                    .unwrap_or_default();
                let command = match operator {
                    OperatorKind::Keys => Command::new("KEYS").arg(key),
                    OperatorKind::Scard => Command::new("SCARD").arg(key),
                    OperatorKind::Sadd => Command::new("SADD").arg(key).arg(content),
                    OperatorKind::Incrby => {
                        let text = std::str::from_utf8(&content).map_err(|e| {
                            ContractError::resolution(format!("incrby value is not utf-8: {e}"))
                        })?;
                        let delta: i64 = text.trim().parse().map_err(|e| {
                            ContractError::resolution(format!("incrby value '{text}': {e}"))
                        })?;
                        Command::new("INCRBY").arg(key).arg(delta)
                    }
                };
                Ok(command)
            }
            Mode::Command { command, args } => {
                let name = command.resolve_string(index, input);
                if name.is_empty() {
                    return Err(ContractError::resolution("command resolved to empty string"));
                }
                let args = match args {
                    None => Vec::new(),
                    Some(mapping) => match mapping.evaluate(index, input)? {
                        Value::Array(items) => items
                            .into_iter()
                            .map(normalize_arg)
                            .collect::<Result<_, _>>()?,
                        _ => {
                            return Err(ContractError::resolution(
                                "mapping returned non-array result",
                            ))
                        }
                    },
                };
                Ok(Command { name, args })
            }
        }
    }

    fn apply_result(&self, output: &mut Message, result: Value) -> Result<(), ContractError> {
        match &self.mode {
            Mode::Operator {
                operator: OperatorKind::Keys,
                ..
            }
            | Mode::Command { .. } => {
                output.set_structured(result);
                Ok(())
            }
            Mode::Operator { operator, .. } => match result.as_i64() {
                Some(n) => {
                    output.set_bytes(n.to_string());
                    Ok(())
                }
                None => Err(ContractError::external(
                    &self.name,
                    format!("{} returned non-integer reply {result}", operator.as_str()),
                )),
            },
        }
    }
}

/// Convert one mapped value into a command argument
fn normalize_arg(value: Value) -> Result<CommandArg, ContractError> {
    match value {
        Value::Number(n) => Ok(if let Some(i) = n.as_i64() {
            CommandArg::Int(i)
        } else if let Some(f) = n.as_f64() {
            CommandArg::Float(f)
        } else {
            CommandArg::Str(n.to_string())
        }),
        Value::String(s) => Ok(CommandArg::Str(s)),
        Value::Bool(b) => Ok(CommandArg::Int(i64::from(b))),
        Value::Null => Ok(CommandArg::Str(String::new())),
        other => Err(ContractError::resolution(format!(
            "unsupported command argument {other}"
        ))),
    }
}

impl<C: CommandClient> ItemAction for CommandProcessor<C> {
    async fn apply_item(
        &self,
        index: usize,
        input: &Batch,
        output: &mut Message,
        cancel: &CancellationToken,
    ) -> Result<(), ContractError> {
        let command = self.build_command(index, input)?;
        debug!(sink = %self.name, index, command = %command.name, "Executing command");
        let result = self
            .retry
            .execute(&self.name, cancel, || self.client.execute(&command))
            .await?;
        self.apply_result(output, result)
    }
}

impl<C: CommandClient> BatchWriter for CommandProcessor<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn granularity(&self) -> FailureGranularity {
        FailureGranularity::PerItem
    }

    #[instrument(name = "command_processor_connect", skip(self), fields(sink = %self.name))]
    async fn connect(&mut self) -> Result<(), ContractError> {
        self.client.connect().await
    }

    #[instrument(
        name = "command_processor_write",
        skip(self, batch, cancel),
        fields(sink = %self.name, size = batch.len())
    )]
    async fn write(
        &mut self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<Batch, ContractError> {
        Ok(self.dispatcher.dispatch_items(&*self, batch, cancel).await)
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.client.close().await
    }
}
