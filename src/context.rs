//! The serving context: both sessions and the tools built on them.

use std::sync::Arc;

use crate::bash::BashTool;
use crate::computer::ComputerTool;
use crate::config::Config;
use crate::display::{DisplaySession, ScreenSource};
use crate::editor::fs::ShellFs;
use crate::editor::EditTool;
use crate::scaling::CoordinateScaler;
use crate::shell::{CommandRunner, ShellSession, Xdotool};

/// Owns one display session, one shell session and the tool state that
/// lives as long as the server (bash session flags, edit history).
pub struct RemoteDesktop {
    display: Arc<DisplaySession>,
    shell: Arc<ShellSession>,
    computer: ComputerTool,
    bash: BashTool,
    editor: EditTool,
}

impl RemoteDesktop {
    pub fn new(config: &Config) -> Self {
        let display = Arc::new(DisplaySession::new(config.display.clone()));
        let shell = Arc::new(ShellSession::new(config.shell.clone()));
        let runner: Arc<dyn CommandRunner> = shell.clone();
        let screen: Arc<dyn ScreenSource> = display.clone();

        Self {
            computer: ComputerTool::new(
                runner.clone(),
                screen,
                CoordinateScaler::new(config.scaling),
                config.screenshot_delay,
            ),
            bash: BashTool::new(runner.clone(), config.bash_timeout),
            editor: EditTool::new(Arc::new(ShellFs::new(runner))),
            display,
            shell,
        }
    }

    pub fn display(&self) -> &DisplaySession {
        &self.display
    }

    pub fn shell(&self) -> &ShellSession {
        &self.shell
    }

    pub fn computer(&self) -> &ComputerTool {
        &self.computer
    }

    pub fn bash(&self) -> &BashTool {
        &self.bash
    }

    pub fn editor(&self) -> &EditTool {
        &self.editor
    }

    pub fn scaler(&self) -> &CoordinateScaler {
        self.computer.scaler()
    }

    pub fn xdotool(&self) -> &Xdotool {
        self.computer.xdotool()
    }

    /// Try both connections. Failures are logged and retried lazily later.
    pub async fn connect(&self) -> (bool, bool) {
        let (vnc, ssh) = tokio::join!(self.display.connect(), self.shell.connect());
        if !vnc {
            tracing::warn!(
                host = %self.display.config().host,
                port = self.display.config().port,
                "VNC not reachable at startup; will retry on first use"
            );
        }
        if !ssh {
            tracing::warn!(
                host = %self.shell.config().host,
                port = self.shell.config().port,
                "SSH not reachable at startup; will retry on first use"
            );
        }
        (vnc, ssh)
    }

    pub async fn shutdown(&self) {
        tokio::join!(self.display.disconnect(), self.shell.disconnect());
        tracing::info!("remote desktop sessions closed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::display::DisplayConfig;
    use crate::scaling::{ScalingConfig, ScalingMode};
    use crate::shell::ShellConfig;

    /// 1920x1080 on display :1, with hosts that refuse every connection.
    pub fn unreachable_config() -> Config {
        Config {
            display: DisplayConfig {
                host: "127.0.0.1".into(),
                port: 1,
                username: None,
                password: Some("secret".into()),
            },
            shell: ShellConfig {
                host: "127.0.0.1".into(),
                port: 1,
                username: "user".into(),
                password: Some("secret".into()),
                private_key: None,
            },
            scaling: ScalingConfig {
                width: 1920,
                height: 1080,
                display_num: Some(1),
                enabled: true,
                mode: ScalingMode::NearestStandard,
            },
            screenshot_delay: Duration::ZERO,
            bash_timeout: Duration::from_secs(5),
        }
    }

    pub fn unreachable_desktop() -> Arc<RemoteDesktop> {
        Arc::new(RemoteDesktop::new(&unreachable_config()))
    }
}
