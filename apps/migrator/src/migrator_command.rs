use aegis_core::{AppError, AppResult};
use aegis_domain::{ActorId, EvaluationContext};
use serde::Serialize;
use serde_json::Value;

use crate::migrator_services::MigratorServices;

pub const USAGE: &str = "usage: aegis-migrator <command>... where command is one of \
run | dry-run | validate | status | rollback | rollout <pct> | check <actor> <action> | sweep";

/// One control command; several may be chained in a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigratorCommand {
    Run,
    DryRun,
    Validate,
    Status,
    Rollback,
    Rollout(u8),
    Check { actor_id: ActorId, action: String },
    Sweep,
}

#[derive(Debug, Serialize)]
pub struct CommandOutput {
    pub command: &'static str,
    pub report: Value,
}

impl MigratorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::DryRun => "dry-run",
            Self::Validate => "validate",
            Self::Status => "status",
            Self::Rollback => "rollback",
            Self::Rollout(_) => "rollout",
            Self::Check { .. } => "check",
            Self::Sweep => "sweep",
        }
    }

    pub fn parse_all(arguments: &[String]) -> AppResult<Vec<Self>> {
        if arguments.is_empty() {
            return Err(AppError::Validation(USAGE.to_owned()));
        }

        let mut commands = Vec::new();
        let mut remaining = arguments.iter().map(String::as_str);
        while let Some(name) = remaining.next() {
            let command = match name {
                "run" => Self::Run,
                "dry-run" => Self::DryRun,
                "validate" => Self::Validate,
                "status" => Self::Status,
                "rollback" => Self::Rollback,
                "sweep" => Self::Sweep,
                "rollout" => {
                    let value = next_argument(&mut remaining, "rollout", "percentage")?;
                    let percentage = value.parse::<u8>().map_err(|error| {
                        AppError::Validation(format!(
                            "invalid rollout percentage '{value}': {error}"
                        ))
                    })?;
                    Self::Rollout(percentage)
                }
                "check" => {
                    let actor_id = ActorId::new(next_argument(&mut remaining, "check", "actor")?)?;
                    let action = next_argument(&mut remaining, "check", "action")?.to_owned();
                    Self::Check { actor_id, action }
                }
                other => {
                    return Err(AppError::Validation(format!(
                        "unknown command '{other}'; {USAGE}"
                    )));
                }
            };
            commands.push(command);
        }

        Ok(commands)
    }

    pub async fn execute(&self, services: &MigratorServices) -> AppResult<CommandOutput> {
        let report = match self {
            Self::Run => to_value(&services.migration.run_migration().await?)?,
            Self::DryRun => to_value(&services.dry_run_migration.run_migration().await?)?,
            Self::Validate => to_value(&services.migration.validate().await?)?,
            Self::Status => to_value(&services.migration.status().await?)?,
            Self::Rollback => {
                let plan = services.migration.plan_rollback().await?;
                let outcome = services.migration.rollback().await?;
                serde_json::json!({ "plan": to_value(&plan)?, "outcome": to_value(&outcome)? })
            }
            Self::Rollout(percentage) => {
                to_value(&services.migration.set_rollout_percentage(*percentage).await?)?
            }
            Self::Check { actor_id, action } => {
                let context = EvaluationContext::now();
                let routed = services.router.check(actor_id, action, &context).await;
                let dynamic = services
                    .router
                    .authorization()
                    .check_permission(actor_id, action, &context)
                    .await;
                serde_json::json!({ "routed": to_value(&routed)?, "dynamic": to_value(&dynamic)? })
            }
            Self::Sweep => to_value(&services.consistency.run().await?)?,
        };

        Ok(CommandOutput {
            command: self.as_str(),
            report,
        })
    }
}

fn next_argument<'a>(
    remaining: &mut impl Iterator<Item = &'a str>,
    command: &str,
    argument: &str,
) -> AppResult<&'a str> {
    remaining.next().ok_or_else(|| {
        AppError::Validation(format!("'{command}' expects a {argument} argument; {USAGE}"))
    })
}

fn to_value<T: Serialize>(report: &T) -> AppResult<Value> {
    serde_json::to_value(report)
        .map_err(|error| AppError::Internal(format!("failed to encode report: {error}")))
}
