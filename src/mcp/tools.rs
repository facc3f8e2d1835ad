// MCP tool parameter types for the tools that are not already described by
// `ActionRequest` (computer) or `EditRequest` (str_replace_editor).

use serde::Deserialize;

use crate::action::ScrollDirection;

/// Parameters for the `bash` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BashParams {
    /// Command to run on the remote machine.
    #[schemars(description = "The bash command to run. Required unless restart is true.")]
    pub command: Option<String>,

    /// Restart the shell session instead of running a command.
    #[serde(default)]
    #[schemars(description = "Restart the shell session. Use this after a timeout.")]
    pub restart: bool,
}

/// Parameters for the `capture_region` tool, in physical screen pixels.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RegionParams {
    #[schemars(description = "Left edge of the region")]
    pub x: u32,
    #[schemars(description = "Top edge of the region")]
    pub y: u32,
    #[schemars(description = "Region width; clipped to the screen")]
    pub w: u32,
    #[schemars(description = "Region height; clipped to the screen")]
    pub h: u32,
}

/// Parameters for the `launch_application` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LaunchParams {
    #[schemars(
        description = "Program to start, e.g. 'firefox'. An existing window whose title matches is activated instead."
    )]
    pub name: String,
}

/// A point on the screen in physical pixels (`mouse_move`, `mouse_double_click`).
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PointParams {
    #[schemars(description = "X coordinate in pixels from the left edge")]
    pub x: u32,
    #[schemars(description = "Y coordinate in pixels from the top edge")]
    pub y: u32,
}

fn default_button() -> u8 {
    1
}

/// Parameters for the `mouse_click` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ClickParams {
    #[schemars(description = "X coordinate in pixels from the left edge")]
    pub x: u32,
    #[schemars(description = "Y coordinate in pixels from the top edge")]
    pub y: u32,
    #[serde(default = "default_button")]
    #[schemars(description = "Mouse button: 1 left (default), 2 middle, 3 right")]
    pub button: u8,
}

fn default_steps() -> u32 {
    1
}

/// Parameters for the `mouse_scroll` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScrollParams {
    #[serde(default = "default_steps")]
    #[schemars(description = "Number of wheel steps (default 1)")]
    pub steps: u32,
    #[serde(default)]
    #[schemars(description = "up, down (default), left or right")]
    pub direction: Option<ScrollDirection>,
}

/// Parameters for the `type_text` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TextParams {
    #[schemars(description = "Text to type")]
    pub text: String,
}

/// Parameters for the `key_press` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct KeyParams {
    #[schemars(description = "Key or combination to press, e.g. 'Return', 'escape' or 'ctrl+alt+t'")]
    pub key: String,
}

/// Parameters for the `window_info` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WindowParams {
    #[schemars(description = "Window id as returned by list_windows")]
    pub id: String,
}

/// Parameters for tools that take no arguments.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct EmptyParams {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_params_defaults() {
        let params: BashParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.command.is_none());
        assert!(!params.restart);
    }

    #[test]
    fn bash_params_restart() {
        let params: BashParams =
            serde_json::from_value(serde_json::json!({"restart": true})).unwrap();
        assert!(params.restart);
    }

    #[test]
    fn region_params_require_all_fields() {
        let err = serde_json::from_value::<RegionParams>(serde_json::json!({"x": 1, "y": 2, "w": 3}));
        assert!(err.is_err());

        let params: RegionParams =
            serde_json::from_value(serde_json::json!({"x": 1, "y": 2, "w": 3, "h": 4})).unwrap();
        assert_eq!((params.x, params.y, params.w, params.h), (1, 2, 3, 4));
    }

    #[test]
    fn region_params_reject_negative() {
        let err = serde_json::from_value::<RegionParams>(
            serde_json::json!({"x": -1, "y": 0, "w": 10, "h": 10}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn launch_params_require_name() {
        assert!(serde_json::from_value::<LaunchParams>(serde_json::json!({})).is_err());
    }

    #[test]
    fn click_params_default_to_left_button() {
        let params: ClickParams =
            serde_json::from_value(serde_json::json!({"x": 5, "y": 6})).unwrap();
        assert_eq!((params.x, params.y, params.button), (5, 6, 1));
    }

    #[test]
    fn scroll_params_defaults() {
        let params: ScrollParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.steps, 1);
        assert!(params.direction.is_none());

        let params: ScrollParams =
            serde_json::from_value(serde_json::json!({"steps": 3, "direction": "up"})).unwrap();
        assert_eq!(params.direction, Some(ScrollDirection::Up));
        assert!(serde_json::from_value::<ScrollParams>(serde_json::json!({"direction": "sideways"}))
            .is_err());
    }

    #[test]
    fn empty_params_accepts_empty_object() {
        let _: EmptyParams = serde_json::from_value(serde_json::json!({})).unwrap();
    }
}
