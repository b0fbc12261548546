//! Stopping and starting the supervised OS service.

use std::time::Duration;

use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::exec::run_shell;

/// Starts and stops the supervised service, synchronously from the caller's
/// point of view. Returns the command's exit code.
#[allow(async_fn_in_trait)]
pub trait ServiceController {
    async fn stop(&mut self, name: &str) -> Result<i32, ServiceError>;
    async fn start(&mut self, name: &str) -> Result<i32, ServiceError>;
}

/// Runs configurable shell commands (`systemctl stop {service}` by default).
#[derive(Debug, Clone)]
pub struct CommandServiceController {
    shell: String,
    stop_command: String,
    start_command: String,
    timeout: Duration,
}

impl CommandServiceController {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            stop_command: config.stop_command.clone(),
            start_command: config.start_command.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    async fn run(&self, template: &str, name: &str) -> Result<i32, ServiceError> {
        let command = render(template, name);
        let output = run_shell(&self.shell, &command, self.timeout).await?;
        debug!(
            "Service: `{command}` exited {}, stdout: {:?}, stderr: {:?}",
            output.exit_code, output.stdout, output.stderr
        );
        Ok(output.exit_code)
    }
}

impl ServiceController for CommandServiceController {
    async fn stop(&mut self, name: &str) -> Result<i32, ServiceError> {
        self.run(&self.stop_command, name).await
    }

    async fn start(&mut self, name: &str) -> Result<i32, ServiceError> {
        self.run(&self.start_command, name).await
    }
}

fn render(template: &str, name: &str) -> String {
    template.replace("{service}", name)
}
