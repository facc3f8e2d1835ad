//! The `computer` tool: turns validated actions into xdotool invocations on
//! the shell channel and follow-up screenshots from the display channel.

use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;

use crate::action::{ActionRequest, ComputerAction};
use crate::display::{self, ScreenSource};
use crate::result::{ToolError, ToolResult};
use crate::scaling::{CoordinateScaler, ScalingSource};
use crate::shell::{quote, CommandOutput, CommandRunner, Xdotool};

pub const TYPING_DELAY_MS: u32 = 20;
pub const TYPING_GROUP_SIZE: usize = 50;
pub const DEFAULT_SCREENSHOT_DELAY: Duration = Duration::from_secs(2);

const TYPING_CHUNK_PAUSE: Duration = Duration::from_millis(50);

pub struct ComputerTool {
    runner: Arc<dyn CommandRunner>,
    screen: Arc<dyn ScreenSource>,
    scaler: CoordinateScaler,
    xdo: Xdotool,
    screenshot_delay: Duration,
}

impl ComputerTool {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        screen: Arc<dyn ScreenSource>,
        scaler: CoordinateScaler,
        screenshot_delay: Duration,
    ) -> Self {
        Self {
            runner,
            screen,
            xdo: Xdotool::new(scaler.config().display_num),
            scaler,
            screenshot_delay,
        }
    }

    pub fn scaler(&self) -> &CoordinateScaler {
        &self.scaler
    }

    pub fn xdotool(&self) -> &Xdotool {
        &self.xdo
    }

    /// Validate and run one action.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ToolResult, ToolError> {
        let action = request.validate()?;
        tracing::debug!(?action, "computer action");
        self.execute(action).await
    }

    async fn execute(&self, action: ComputerAction) -> Result<ToolResult, ToolError> {
        match action {
            ComputerAction::Key { keys } => {
                let keys: Vec<String> = keys.split_whitespace().map(quote).collect();
                self.shell(&self.xdo.cmd(&format!("key -- {}", keys.join(" "))), true)
                    .await
            }
            ComputerAction::Type { text } => self.type_text(&text).await,
            ComputerAction::HoldKey { key, duration } => {
                let key = quote(&key);
                let cmd = self.xdo.chain([
                    format!("keydown {key}").as_str(),
                    format!("sleep {duration}").as_str(),
                    format!("keyup {key}").as_str(),
                ]);
                self.shell(&cmd, true).await
            }
            ComputerAction::MouseMove { to } => {
                let (x, y) = self.to_physical(to)?;
                self.shell(&self.xdo.cmd(&format!("mousemove --sync {x} {y}")), true)
                    .await
            }
            ComputerAction::LeftClickDrag { from, to } => {
                let start = match from {
                    Some(p) => {
                        let (x, y) = self.to_physical(p)?;
                        format!("mousemove --sync {x} {y}")
                    }
                    None => String::new(),
                };
                let (x, y) = self.to_physical(to)?;
                let cmd = self.xdo.chain([
                    start.as_str(),
                    "mousedown 1",
                    format!("mousemove --sync {x} {y}").as_str(),
                    "mouseup 1",
                ]);
                self.shell(&cmd, true).await
            }
            ComputerAction::Click { kind, at, modifier } => {
                let click = format!("click {}", kind.xdotool_args());
                let cmd = self.with_move_and_modifier(at, modifier.as_deref(), &click)?;
                self.shell(&cmd, true).await
            }
            ComputerAction::Scroll {
                direction,
                amount,
                at,
                modifier,
            } => {
                let click = format!("click --repeat {amount} {}", direction.xdotool_button());
                let cmd = self.with_move_and_modifier(at, modifier.as_deref(), &click)?;
                self.shell(&cmd, true).await
            }
            ComputerAction::LeftMouseDown => self.shell(&self.xdo.cmd("mousedown 1"), true).await,
            ComputerAction::LeftMouseUp => self.shell(&self.xdo.cmd("mouseup 1"), true).await,
            ComputerAction::Wait { duration } => {
                tokio::time::sleep(Duration::from_secs_f64(duration)).await;
                self.screenshot().await
            }
            ComputerAction::Screenshot => self.screenshot().await,
            ComputerAction::CursorPosition => self.cursor_position().await,
        }
    }

    /// Capture the screen, resized to the agent's view of it.
    pub async fn screenshot(&self) -> Result<ToolResult, ToolError> {
        let mut img = self.screen.capture_screenshot().await?;
        let (w, h) = self.scaler.agent_screen_size();
        if (w, h) != img.dimensions() && w > 0 && h > 0 {
            img = image::imageops::resize(&img, w, h, FilterType::Triangle);
        }
        let b64 = display::png_base64(&img)?;
        Ok(ToolResult::output("took screenshot successfully").with_image(b64))
    }

    async fn type_text(&self, text: &str) -> Result<ToolResult, ToolError> {
        let chars: Vec<char> = text.chars().collect();
        let mut results = Vec::new();
        for (i, chunk) in chars.chunks(TYPING_GROUP_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(TYPING_CHUNK_PAUSE).await;
            }
            let chunk: String = chunk.iter().collect();
            let cmd = self.xdo.cmd(&format!(
                "type --delay {TYPING_DELAY_MS} -- {}",
                quote(&chunk)
            ));
            results.push(self.shell(&cmd, false).await?);
        }
        let mut combined = ToolResult::combine(results);
        self.attach_screenshot(&mut combined).await;
        Ok(combined)
    }

    async fn cursor_position(&self) -> Result<ToolResult, ToolError> {
        let result = self
            .shell(&self.xdo.cmd("getmouselocation --shell"), false)
            .await?;
        let output = result.output.clone().unwrap_or_default();
        let (x, y) = parse_mouse_location(&output).ok_or_else(|| {
            ToolError::Remote(format!("could not parse cursor position from {output:?}"))
        })?;
        let (x, y) = self.scaler.scale(ScalingSource::Computer, x, y)?;
        Ok(ToolResult {
            output: Some(format!("X={x},Y={y}")),
            ..result
        })
    }

    /// `[mousemove --sync x y] [keydown m] <action> [keyup m]`
    fn with_move_and_modifier(
        &self,
        at: Option<(u32, u32)>,
        modifier: Option<&str>,
        action: &str,
    ) -> Result<String, ToolError> {
        let mut parts = Vec::new();
        if let Some(p) = at {
            let (x, y) = self.to_physical(p)?;
            parts.push(format!("mousemove --sync {x} {y}"));
        }
        if let Some(m) = modifier {
            parts.push(format!("keydown {}", quote(m)));
        }
        parts.push(action.to_string());
        if let Some(m) = modifier {
            parts.push(format!("keyup {}", quote(m)));
        }
        Ok(self.xdo.chain(parts.iter().map(String::as_str)))
    }

    fn to_physical(&self, (x, y): (u32, u32)) -> Result<(u32, u32), ToolError> {
        self.scaler.scale(ScalingSource::Api, x, y)
    }

    async fn shell(&self, command: &str, take_screenshot: bool) -> Result<ToolResult, ToolError> {
        let out = self.runner.run(command).await;
        let mut result = command_result(out)?;
        if take_screenshot {
            self.attach_screenshot(&mut result).await;
        }
        Ok(result)
    }

    /// Wait for the screen to settle, then add a screenshot. A failed capture
    /// is reported in the error text rather than failing the action.
    async fn attach_screenshot(&self, result: &mut ToolResult) {
        tokio::time::sleep(self.screenshot_delay).await;
        match self.screenshot().await {
            Ok(shot) => result.base64_image = shot.base64_image,
            Err(e) => {
                tracing::warn!(error = %e, "follow-up screenshot failed");
                let mut error = result.error.take().unwrap_or_default();
                if !error.is_empty() {
                    error.push('\n');
                }
                error.push_str(&format!("Failed to take screenshot: {e}"));
                result.error = Some(error);
            }
        }
    }
}

fn command_result(out: CommandOutput) -> Result<ToolResult, ToolError> {
    if out.connection_failed {
        return Err(ToolError::Connection(out.error));
    }
    Ok(ToolResult {
        output: Some(out.output),
        error: (!out.error.is_empty()).then_some(out.error),
        ..Default::default()
    })
}

/// Parse `X=..` and `Y=..` lines from `xdotool getmouselocation --shell`.
fn parse_mouse_location(output: &str) -> Option<(u32, u32)> {
    let mut x = None;
    let mut y = None;
    for line in output.lines() {
        if let Some(v) = line.trim().strip_prefix("X=") {
            x = v.parse().ok();
        } else if let Some(v) = line.trim().strip_prefix("Y=") {
            y = v.parse().ok();
        }
    }
    Some((x?, y?))
}
