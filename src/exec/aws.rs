// AWS SDK clients for the real executor: ECR tokens, STS identity, Lambda updates

use aws_config::BehaviorVersion;
use aws_sdk_ecr::error::DisplayErrorContext;
use aws_sdk_lambda::types::LastUpdateStatus;
use base64::Engine;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::CallerIdentity;
use crate::error::CommandError;

/// Pause between `GetFunctionConfiguration` polls while an update is in progress
const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub(crate) struct AwsClients {
    ecr: aws_sdk_ecr::Client,
    sts: aws_sdk_sts::Client,
    lambda: aws_sdk_lambda::Client,
}

impl AwsClients {
    /// Load the default credential chain for `region`, optionally through a named profile
    pub(crate) async fn connect(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(aws_config::Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        info!(
            "AWS session opened for region {}{}",
            region,
            profile.map(|p| format!(" (profile {})", p)).unwrap_or_default()
        );

        Self {
            ecr: aws_sdk_ecr::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
        }
    }

    /// Registry password from `GetAuthorizationToken`
    pub(crate) async fn registry_password(&self, timeout: Duration) -> Result<String, CommandError> {
        const OPERATION: &str = "ecr:GetAuthorizationToken";

        let response = bounded(OPERATION, timeout, async {
            self.ecr
                .get_authorization_token()
                .send()
                .await
                .map_err(|e| sdk_failure(OPERATION, e))
        })
        .await?;

        let token = response
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .ok_or_else(|| CommandError::Output {
                command: OPERATION.to_string(),
                message: "no authorization data returned".to_string(),
            })?;

        let (_, password) = decode_authorization_token(token)?;
        Ok(password)
    }

    pub(crate) async fn caller_identity(&self, timeout: Duration) -> Result<CallerIdentity, CommandError> {
        const OPERATION: &str = "sts:GetCallerIdentity";

        let response = bounded(OPERATION, timeout, async {
            self.sts
                .get_caller_identity()
                .send()
                .await
                .map_err(|e| sdk_failure(OPERATION, e))
        })
        .await?;

        match (response.account(), response.arn()) {
            (Some(account), Some(arn)) => Ok(CallerIdentity {
                account: account.to_string(),
                arn: arn.to_string(),
            }),
            _ => Err(CommandError::Output {
                command: OPERATION.to_string(),
                message: "response is missing the account or ARN".to_string(),
            }),
        }
    }

    /// Point `function` at `image_uri`, then poll until Lambda reports the update outcome
    pub(crate) async fn update_function(
        &self,
        function: &str,
        image_uri: &str,
        timeout: Duration,
    ) -> Result<(), CommandError> {
        const OPERATION: &str = "lambda:UpdateFunctionCode";

        bounded(OPERATION, timeout, async {
            self.lambda
                .update_function_code()
                .function_name(function)
                .image_uri(image_uri)
                .send()
                .await
                .map_err(|e| sdk_failure(OPERATION, e))?;

            loop {
                let configuration = self
                    .lambda
                    .get_function_configuration()
                    .function_name(function)
                    .send()
                    .await
                    .map_err(|e| sdk_failure("lambda:GetFunctionConfiguration", e))?;

                match configuration.last_update_status() {
                    Some(LastUpdateStatus::Successful) => return Ok(()),
                    Some(LastUpdateStatus::Failed) => {
                        return Err(CommandError::Aws {
                            operation: OPERATION.to_string(),
                            message: configuration
                                .last_update_status_reason()
                                .unwrap_or("update failed without a reason")
                                .to_string(),
                        })
                    }
                    status => {
                        debug!("Function {} update status {:?}, waiting", function, status);
                        tokio::time::sleep(UPDATE_POLL_INTERVAL).await;
                    }
                }
            }
        })
        .await
    }
}

/// Split a base64 `user:password` ECR authorization token
pub(crate) fn decode_authorization_token(token: &str) -> Result<(String, String), CommandError> {
    let malformed = |message: &str| CommandError::Output {
        command: "ecr:GetAuthorizationToken".to_string(),
        message: message.to_string(),
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|_| malformed("authorization token is not valid base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed("authorization token is not UTF-8"))?;

    match decoded.split_once(':') {
        Some((user, password)) if !user.is_empty() && !password.is_empty() => {
            Ok((user.to_string(), password.to_string()))
        }
        _ => Err(malformed("authorization token is not in user:password form")),
    }
}

fn sdk_failure<E: std::error::Error>(operation: &str, error: E) -> CommandError {
    CommandError::Aws {
        operation: operation.to_string(),
        message: DisplayErrorContext(error).to_string(),
    }
}

/// Run an SDK call under the same deadline rules as a subprocess
async fn bounded<T, F>(operation: &str, after: Duration, call: F) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, CommandError>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| CommandError::TimedOut {
            command: operation.to_string(),
            after,
        })?
}
