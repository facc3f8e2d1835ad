pub mod tools;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};

use image::RgbaImage;

use crate::action::{ActionRequest, ScrollDirection};
use crate::context::RemoteDesktop;
use crate::display::rfb::Button;
use crate::display::{png_base64, DisplayError};
use crate::editor::EditRequest;
use crate::result::{to_mcp, ToolError, ToolResult};
use crate::shell;

use tools::{
    BashParams, ClickParams, EmptyParams, KeyParams, LaunchParams, PointParams, RegionParams,
    ScrollParams, TextParams, WindowParams,
};

/// MCP front end over one [`RemoteDesktop`].
///
/// The HTTP transport builds one per session; all of them share the same
/// connections and tool state.
pub struct RcuMcpServer {
    desktop: Arc<RemoteDesktop>,
    tool_router: ToolRouter<RcuMcpServer>,
    /// Shared counter for active MCP sessions. Decremented on Drop.
    session_counter: Option<Arc<AtomicUsize>>,
}

impl RcuMcpServer {
    pub fn new(desktop: Arc<RemoteDesktop>) -> Self {
        Self {
            desktop,
            tool_router: Self::tool_router(),
            session_counter: None,
        }
    }

    /// Attach a shared session counter that is decremented when this server is dropped.
    pub fn with_session_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.session_counter = Some(counter);
        self
    }

    fn instructions(&self) -> String {
        let (width, height) = self.desktop.scaler().agent_screen_size();
        let display = self.desktop.scaler().config().display_num.unwrap_or(0);
        format!(
            "rcu controls a remote Linux desktop over VNC and SSH. The screen is \
             {width}x{height} (X display :{display}); all coordinates passed to the \
             computer tool are in that space. Use computer for mouse, keyboard and \
             screenshots, bash for shell commands, and str_replace_editor to view or \
             edit remote files. capture_screenshot and capture_region return images \
             at the physical resolution; mouse_move, mouse_click, mouse_double_click, \
             mouse_scroll, type_text and key_press act on the display directly in \
             physical pixels and return a screenshot."
        )
    }

    /// Screenshot taken right after a direct input action.
    async fn screen_after(
        &self,
        done: Result<(), DisplayError>,
    ) -> Result<CallToolResult, ErrorData> {
        match done {
            Ok(()) => image_or_error(self.desktop.display().capture_screenshot().await),
            Err(e) => to_mcp(Err(ToolError::from(e))),
        }
    }
}

impl Drop for RcuMcpServer {
    fn drop(&mut self) {
        if let Some(ref counter) = self.session_counter {
            counter.fetch_sub(1, Ordering::Release);
        }
    }
}

fn image_result(b64: String) -> CallToolResult {
    CallToolResult::success(vec![Content::image(b64, "image/png")])
}

fn image_or_error(captured: Result<RgbaImage, DisplayError>) -> Result<CallToolResult, ErrorData> {
    match captured.and_then(|img| png_base64(&img)) {
        Ok(b64) => Ok(image_result(b64)),
        Err(e) => to_mcp(Err(ToolError::from(e))),
    }
}

fn json_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string(&value).unwrap_or_default(),
    )])
}

#[tool_router]
impl RcuMcpServer {
    #[tool(description = "Interact with the remote desktop using mouse and keyboard, and take screenshots. \
        Actions: key, hold_key, type, cursor_position, mouse_move, left_mouse_down, left_mouse_up, \
        left_click, left_click_drag, right_click, middle_click, double_click, triple_click, scroll, \
        wait, screenshot. Coordinates are [x, y] in the screen size given in the server instructions. \
        Most actions return a screenshot taken after a short delay.")]
    async fn computer(
        &self,
        Parameters(request): Parameters<ActionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let action = request.action;
        let result = self.desktop.computer().dispatch(request).await;
        if let Err(e) = &result {
            tracing::debug!(%action, error = %e, "computer action failed");
        }
        to_mcp(result)
    }

    #[tool(description = "Run a bash command on the remote machine. State such as the working \
        directory is not kept between calls. Commands time out after a fixed limit; after a \
        timeout the tool must be restarted with restart=true.")]
    async fn bash(
        &self,
        Parameters(params): Parameters<BashParams>,
    ) -> Result<CallToolResult, ErrorData> {
        to_mcp(
            self.desktop
                .bash()
                .run(params.command.as_deref(), params.restart)
                .await,
        )
    }

    #[tool(description = "View, create and edit files on the remote machine. Commands: view (file \
        or directory, optional view_range), create (file_text), str_replace (old_str must match \
        exactly once), insert (new_str after insert_line), undo_edit (revert the last edit). \
        Paths must be absolute.")]
    async fn str_replace_editor(
        &self,
        Parameters(request): Parameters<EditRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        to_mcp(self.desktop.editor().edit(request).await)
    }

    #[tool(description = "Capture the full remote screen at its physical resolution and return it as a PNG image.")]
    async fn capture_screenshot(
        &self,
        #[allow(unused_variables)]
        Parameters(params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, ErrorData> {
        image_or_error(self.desktop.display().capture_screenshot().await)
    }

    #[tool(description = "Capture a rectangle of the remote screen in physical pixels and return it \
        as a PNG image. The region is clipped to the screen.")]
    async fn capture_region(
        &self,
        Parameters(params): Parameters<RegionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let RegionParams { x, y, w, h } = params;
        if w == 0 || h == 0 {
            return Err(ErrorData::invalid_params("w and h must be positive", None));
        }
        image_or_error(self.desktop.display().capture_region(x, y, w, h).await)
    }

    #[tool(description = "Move the mouse to (x, y) in physical screen pixels and return a screenshot.")]
    async fn mouse_move(
        &self,
        Parameters(params): Parameters<PointParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let done = self.desktop.display().mouse_move(params.x, params.y).await;
        self.screen_after(done).await
    }

    #[tool(description = "Click at (x, y) in physical screen pixels and return a screenshot. \
        button: 1 left (default), 2 middle, 3 right.")]
    async fn mouse_click(
        &self,
        Parameters(params): Parameters<ClickParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let button = match Button::from_number(params.button) {
            Some(b @ (Button::Left | Button::Middle | Button::Right)) => b,
            _ => {
                return Err(ErrorData::invalid_params(
                    "button must be 1 (left), 2 (middle) or 3 (right)",
                    None,
                ))
            }
        };
        let done = self
            .desktop
            .display()
            .mouse_click(params.x, params.y, button, 1)
            .await;
        self.screen_after(done).await
    }

    #[tool(description = "Double-click the left button at (x, y) in physical screen pixels and \
        return a screenshot.")]
    async fn mouse_double_click(
        &self,
        Parameters(params): Parameters<PointParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let done = self
            .desktop
            .display()
            .mouse_click(params.x, params.y, Button::Left, 2)
            .await;
        self.screen_after(done).await
    }

    #[tool(description = "Scroll the mouse wheel at the current pointer position and return a \
        screenshot. direction: up, down (default), left or right.")]
    async fn mouse_scroll(
        &self,
        Parameters(params): Parameters<ScrollParams>,
    ) -> Result<CallToolResult, ErrorData> {
        if params.steps == 0 {
            return Err(ErrorData::invalid_params("steps must be positive", None));
        }
        let direction = params.direction.unwrap_or(ScrollDirection::Down);
        let done = self
            .desktop
            .display()
            .mouse_scroll(params.steps, direction.button())
            .await;
        self.screen_after(done).await
    }

    #[tool(description = "Type text on the remote display, one key per character, and return a screenshot.")]
    async fn type_text(
        &self,
        Parameters(params): Parameters<TextParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let done = self.desktop.display().type_text(&params.text).await;
        self.screen_after(done).await
    }

    #[tool(description = "Press a key or combination such as 'Return', 'escape' or 'ctrl+alt+t' \
        and return a screenshot.")]
    async fn key_press(
        &self,
        Parameters(params): Parameters<KeyParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let done = self.desktop.display().key_press(&params.key).await;
        self.screen_after(done).await
    }

    #[tool(description = "Activate a window whose title matches name, or start the program in the \
        background on the remote display. Returns JSON with success, output and error.")]
    async fn launch_application(
        &self,
        Parameters(params): Parameters<LaunchParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(ErrorData::invalid_params("name must not be empty", None));
        }
        let out =
            shell::launch_application(self.desktop.shell(), self.desktop.xdotool(), name).await;
        tracing::info!(app = name, success = out.success, "launch_application");
        if out.connection_failed {
            return to_mcp(Err(ToolError::Connection(out.error)));
        }
        Ok(json_result(serde_json::json!({
            "success": out.success,
            "output": out.output,
            "error": out.error,
        })))
    }

    #[tool(description = "Geometry and title of one window, by id from list_windows. Returns JSON \
        with success, id, name and geometry.")]
    async fn window_info(
        &self,
        Parameters(params): Parameters<WindowParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = params.id.trim();
        if id.is_empty() {
            return Err(ErrorData::invalid_params("id must not be empty", None));
        }
        let details = shell::window_info(self.desktop.shell(), self.desktop.xdotool(), id).await;
        Ok(json_result(serde_json::to_value(&details).unwrap_or_default()))
    }

    #[tool(description = "List visible windows on the remote display. Returns JSON with window ids and titles.")]
    async fn list_windows(
        &self,
        #[allow(unused_variables)]
        Parameters(params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, ErrorData> {
        match shell::list_windows(self.desktop.shell(), self.desktop.xdotool()).await {
            Ok(windows) => Ok(json_result(serde_json::json!({ "windows": windows }))),
            Err(out) if out.connection_failed => to_mcp(Err(ToolError::Connection(out.error))),
            Err(out) => Ok(ToolResult::error(format!("Failed to list windows: {}", out.error))
                .into_call_result()),
        }
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for RcuMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "rcu".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Remote computer use: screen, mouse and keyboard over VNC, shell and \
                     file editing over SSH."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(self.instructions()),
        }
    }
}
