//! Action requests for the `computer` tool and their field contract.
//!
//! An [`ActionRequest`] is the loose wire shape. [`ActionRequest::validate`]
//! checks the exact required/forbidden field set for the action kind and
//! produces a typed [`ComputerAction`] before anything touches the remote
//! machine.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::display::rfb::Button;
use crate::result::ToolError;

/// Longest accepted `duration`, in seconds.
pub const MAX_DURATION_SECS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Key,
    HoldKey,
    Type,
    CursorPosition,
    MouseMove,
    LeftMouseDown,
    LeftMouseUp,
    LeftClick,
    LeftClickDrag,
    RightClick,
    MiddleClick,
    DoubleClick,
    TripleClick,
    Scroll,
    Wait,
    Screenshot,
}

impl ActionKind {
    pub const ALL: [ActionKind; 16] = [
        ActionKind::Key,
        ActionKind::HoldKey,
        ActionKind::Type,
        ActionKind::CursorPosition,
        ActionKind::MouseMove,
        ActionKind::LeftMouseDown,
        ActionKind::LeftMouseUp,
        ActionKind::LeftClick,
        ActionKind::LeftClickDrag,
        ActionKind::RightClick,
        ActionKind::MiddleClick,
        ActionKind::DoubleClick,
        ActionKind::TripleClick,
        ActionKind::Scroll,
        ActionKind::Wait,
        ActionKind::Screenshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Key => "key",
            ActionKind::HoldKey => "hold_key",
            ActionKind::Type => "type",
            ActionKind::CursorPosition => "cursor_position",
            ActionKind::MouseMove => "mouse_move",
            ActionKind::LeftMouseDown => "left_mouse_down",
            ActionKind::LeftMouseUp => "left_mouse_up",
            ActionKind::LeftClick => "left_click",
            ActionKind::LeftClickDrag => "left_click_drag",
            ActionKind::RightClick => "right_click",
            ActionKind::MiddleClick => "middle_click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::TripleClick => "triple_click",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Screenshot => "screenshot",
        }
    }

    /// Required and optional fields. Everything else is forbidden.
    fn contract(self) -> (&'static [Field], &'static [Field]) {
        const CLICK_OPTIONAL: &[Field] = &[Field::Coordinate, Field::Text];
        match self {
            ActionKind::Key | ActionKind::Type => (&[Field::Text], &[]),
            ActionKind::HoldKey => (&[Field::Text, Field::Duration], &[]),
            ActionKind::MouseMove => (&[Field::Coordinate], &[]),
            ActionKind::LeftClickDrag => (&[Field::Coordinate], &[Field::StartCoordinate]),
            ActionKind::LeftClick
            | ActionKind::RightClick
            | ActionKind::MiddleClick
            | ActionKind::DoubleClick
            | ActionKind::TripleClick => (&[], CLICK_OPTIONAL),
            ActionKind::Scroll => (
                &[Field::ScrollDirection, Field::ScrollAmount],
                CLICK_OPTIONAL,
            ),
            ActionKind::Wait => (&[Field::Duration], &[]),
            ActionKind::LeftMouseDown
            | ActionKind::LeftMouseUp
            | ActionKind::Screenshot
            | ActionKind::CursorPosition => (&[], &[]),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// X11 wheel button for this direction.
    pub fn button(self) -> Button {
        match self {
            ScrollDirection::Up => Button::WheelUp,
            ScrollDirection::Down => Button::WheelDown,
            ScrollDirection::Left => Button::WheelLeft,
            ScrollDirection::Right => Button::WheelRight,
        }
    }

    pub fn xdotool_button(self) -> u8 {
        match self {
            ScrollDirection::Up => 4,
            ScrollDirection::Down => 5,
            ScrollDirection::Left => 6,
            ScrollDirection::Right => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Coordinate,
    StartCoordinate,
    Text,
    Duration,
    ScrollDirection,
    ScrollAmount,
}

impl Field {
    const ALL: [Field; 6] = [
        Field::Coordinate,
        Field::StartCoordinate,
        Field::Text,
        Field::Duration,
        Field::ScrollDirection,
        Field::ScrollAmount,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Coordinate => "coordinate",
            Field::StartCoordinate => "start_coordinate",
            Field::Text => "text",
            Field::Duration => "duration",
            Field::ScrollDirection => "scroll_direction",
            Field::ScrollAmount => "scroll_amount",
        }
    }
}

/// One `computer` tool call as it arrives over MCP.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ActionRequest {
    #[schemars(description = "The action to perform")]
    pub action: ActionKind,
    #[serde(default)]
    #[schemars(description = "[x, y] target in screen coordinates")]
    pub coordinate: Option<Vec<i64>>,
    #[serde(default)]
    #[schemars(description = "[x, y] drag origin (left_click_drag only)")]
    pub start_coordinate: Option<Vec<i64>>,
    #[serde(default)]
    #[schemars(
        description = "Text to type, key combo for key/hold_key, or a modifier held during click/scroll"
    )]
    pub text: Option<String>,
    #[serde(default)]
    #[schemars(description = "Seconds to hold a key or wait (0-100)")]
    pub duration: Option<f64>,
    #[serde(default)]
    #[schemars(description = "Scroll direction")]
    pub scroll_direction: Option<ScrollDirection>,
    #[serde(default)]
    #[schemars(description = "Number of scroll wheel clicks")]
    pub scroll_amount: Option<i64>,
}

impl ActionRequest {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            coordinate: None,
            start_coordinate: None,
            text: None,
            duration: None,
            scroll_direction: None,
            scroll_amount: None,
        }
    }

    fn has(&self, field: Field) -> bool {
        match field {
            Field::Coordinate => self.coordinate.is_some(),
            Field::StartCoordinate => self.start_coordinate.is_some(),
            Field::Text => self.text.is_some(),
            Field::Duration => self.duration.is_some(),
            Field::ScrollDirection => self.scroll_direction.is_some(),
            Field::ScrollAmount => self.scroll_amount.is_some(),
        }
    }

    /// Check the field contract and build the typed action.
    pub fn validate(self) -> Result<ComputerAction, ToolError> {
        let action = self.action;
        let (required, optional) = action.contract();
        for field in Field::ALL {
            let allowed = required.contains(&field) || optional.contains(&field);
            if self.has(field) && !allowed {
                return Err(ToolError::validation(format!(
                    "{} is not accepted for {action}",
                    field.name()
                )));
            }
            if !self.has(field) && required.contains(&field) {
                return Err(ToolError::validation(format!(
                    "{} is required for {action}",
                    field.name()
                )));
            }
        }

        let coordinate = self.coordinate.as_deref().map(point).transpose()?;
        let start = self.start_coordinate.as_deref().map(point).transpose()?;
        let duration = self.duration.map(duration).transpose()?;
        let text = self.text;

        // The contract check above guarantees the required fields exist.
        let missing = || ToolError::validation(format!("incomplete {action} request"));

        Ok(match action {
            ActionKind::Key => ComputerAction::Key { keys: text.ok_or_else(missing)? },
            ActionKind::Type => ComputerAction::Type { text: text.ok_or_else(missing)? },
            ActionKind::HoldKey => ComputerAction::HoldKey {
                key: text.ok_or_else(missing)?,
                duration: duration.ok_or_else(missing)?,
            },
            ActionKind::MouseMove => ComputerAction::MouseMove { to: coordinate.ok_or_else(missing)? },
            ActionKind::LeftClickDrag => ComputerAction::LeftClickDrag {
                from: start,
                to: coordinate.ok_or_else(missing)?,
            },
            ActionKind::LeftClick => click(ClickKind::Left, coordinate, text),
            ActionKind::RightClick => click(ClickKind::Right, coordinate, text),
            ActionKind::MiddleClick => click(ClickKind::Middle, coordinate, text),
            ActionKind::DoubleClick => click(ClickKind::Double, coordinate, text),
            ActionKind::TripleClick => click(ClickKind::Triple, coordinate, text),
            ActionKind::Scroll => {
                let amount = self.scroll_amount.ok_or_else(missing)?;
                let amount = u32::try_from(amount).map_err(|_| {
                    ToolError::validation(format!("scroll_amount={amount} must be a non-negative int"))
                })?;
                ComputerAction::Scroll {
                    direction: self.scroll_direction.ok_or_else(missing)?,
                    amount,
                    at: coordinate,
                    modifier: text.filter(|t| !t.is_empty()),
                }
            }
            ActionKind::LeftMouseDown => ComputerAction::LeftMouseDown,
            ActionKind::LeftMouseUp => ComputerAction::LeftMouseUp,
            ActionKind::Wait => ComputerAction::Wait { duration: duration.ok_or_else(missing)? },
            ActionKind::Screenshot => ComputerAction::Screenshot,
            ActionKind::CursorPosition => ComputerAction::CursorPosition,
        })
    }
}

fn click(kind: ClickKind, at: Option<(u32, u32)>, modifier: Option<String>) -> ComputerAction {
    ComputerAction::Click {
        kind,
        at,
        modifier: modifier.filter(|m| !m.is_empty()),
    }
}

fn point(raw: &[i64]) -> Result<(u32, u32), ToolError> {
    let [x, y] = raw else {
        return Err(ToolError::validation(format!("{raw:?} must be a tuple of length 2")));
    };
    match (u32::try_from(*x), u32::try_from(*y)) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        _ => Err(ToolError::validation(format!(
            "{raw:?} must be a tuple of non-negative ints"
        ))),
    }
}

fn duration(d: f64) -> Result<f64, ToolError> {
    if !d.is_finite() {
        return Err(ToolError::validation(format!("duration={d} must be a number")));
    }
    if d < 0.0 {
        return Err(ToolError::validation(format!("duration={d} must be non-negative")));
    }
    if d > MAX_DURATION_SECS {
        return Err(ToolError::validation(format!("duration={d} is too long.")));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Left,
    Right,
    Middle,
    Double,
    Triple,
}

impl ClickKind {
    /// Arguments to `xdotool click`.
    pub fn xdotool_args(self) -> &'static str {
        match self {
            ClickKind::Left => "1",
            ClickKind::Right => "3",
            ClickKind::Middle => "2",
            ClickKind::Double => "--repeat 2 --delay 10 1",
            ClickKind::Triple => "--repeat 3 --delay 10 1",
        }
    }
}

/// A validated action. Coordinates are still in the agent's space.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputerAction {
    Key { keys: String },
    Type { text: String },
    HoldKey { key: String, duration: f64 },
    MouseMove { to: (u32, u32) },
    LeftClickDrag { from: Option<(u32, u32)>, to: (u32, u32) },
    Click { kind: ClickKind, at: Option<(u32, u32)>, modifier: Option<String> },
    Scroll {
        direction: ScrollDirection,
        amount: u32,
        at: Option<(u32, u32)>,
        modifier: Option<String>,
    },
    LeftMouseDown,
    LeftMouseUp,
    Wait { duration: f64 },
    Screenshot,
    CursorPosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A request for `kind` carrying a plausible value for `field`.
    fn with_field(mut req: ActionRequest, field: Field) -> ActionRequest {
        match field {
            Field::Coordinate => req.coordinate = Some(vec![10, 20]),
            Field::StartCoordinate => req.start_coordinate = Some(vec![1, 2]),
            Field::Text => req.text = Some("ctrl".into()),
            Field::Duration => req.duration = Some(1.5),
            Field::ScrollDirection => req.scroll_direction = Some(ScrollDirection::Down),
            Field::ScrollAmount => req.scroll_amount = Some(3),
        }
        req
    }

    fn minimal(kind: ActionKind) -> ActionRequest {
        let (required, _) = kind.contract();
        required
            .iter()
            .fold(ActionRequest::new(kind), |req, f| with_field(req, *f))
    }

    #[test]
    fn minimal_request_validates_for_every_kind() {
        for kind in ActionKind::ALL {
            assert!(minimal(kind).validate().is_ok(), "{kind}");
        }
    }

    #[test]
    fn every_forbidden_field_is_rejected() {
        for kind in ActionKind::ALL {
            let (required, optional) = kind.contract();
            for field in Field::ALL {
                if required.contains(&field) || optional.contains(&field) {
                    continue;
                }
                let err = with_field(minimal(kind), field).validate().unwrap_err();
                assert_eq!(
                    err,
                    ToolError::validation(format!("{} is not accepted for {kind}", field.name())),
                );
            }
        }
    }

    #[test]
    fn every_missing_required_field_is_rejected() {
        for kind in ActionKind::ALL {
            let (required, _) = kind.contract();
            for missing in required {
                let req = required
                    .iter()
                    .filter(|f| *f != missing)
                    .fold(ActionRequest::new(kind), |req, f| with_field(req, *f));
                let err = req.validate().unwrap_err();
                assert_eq!(
                    err,
                    ToolError::validation(format!("{} is required for {kind}", missing.name())),
                );
            }
        }
    }

    #[test]
    fn every_optional_field_is_accepted() {
        for kind in ActionKind::ALL {
            let (_, optional) = kind.contract();
            for field in optional {
                assert!(with_field(minimal(kind), *field).validate().is_ok(), "{kind} + {field:?}");
            }
        }
    }

    #[test]
    fn coordinates_must_be_two_non_negative_ints() {
        let mut req = ActionRequest::new(ActionKind::MouseMove);
        req.coordinate = Some(vec![1, 2, 3]);
        assert!(req.clone().validate().unwrap_err().is_validation());
        req.coordinate = Some(vec![-1, 2]);
        assert!(req.clone().validate().unwrap_err().is_validation());
        req.coordinate = Some(vec![5, 6]);
        assert_eq!(req.validate().unwrap(), ComputerAction::MouseMove { to: (5, 6) });
    }

    #[test]
    fn duration_bounds() {
        let mut req = ActionRequest::new(ActionKind::Wait);
        req.duration = Some(100.0);
        assert!(req.clone().validate().is_ok());
        req.duration = Some(100.5);
        assert!(req.clone().validate().is_err());
        req.duration = Some(-0.1);
        assert!(req.clone().validate().is_err());
        req.duration = Some(f64::NAN);
        assert!(req.validate().is_err());
    }

    #[test]
    fn negative_scroll_amount_is_rejected() {
        let mut req = minimal(ActionKind::Scroll);
        req.scroll_amount = Some(-2);
        assert!(req.validate().unwrap_err().is_validation());
    }

    #[test]
    fn drag_keeps_optional_start() {
        let req: ActionRequest = serde_json::from_value(serde_json::json!({
            "action": "left_click_drag",
            "start_coordinate": [1, 2],
            "coordinate": [30, 40],
        }))
        .unwrap();
        assert_eq!(
            req.validate().unwrap(),
            ComputerAction::LeftClickDrag { from: Some((1, 2)), to: (30, 40) }
        );
    }

    #[test]
    fn click_text_becomes_modifier() {
        let req: ActionRequest = serde_json::from_value(serde_json::json!({
            "action": "double_click",
            "coordinate": [3, 4],
            "text": "shift",
        }))
        .unwrap();
        assert_eq!(
            req.validate().unwrap(),
            ComputerAction::Click {
                kind: ClickKind::Double,
                at: Some((3, 4)),
                modifier: Some("shift".into()),
            }
        );
    }

    #[test]
    fn unknown_action_fails_to_deserialize() {
        let res: Result<ActionRequest, _> =
            serde_json::from_value(serde_json::json!({ "action": "teleport" }));
        assert!(res.is_err());
    }

    #[test]
    fn scroll_buttons() {
        assert_eq!(ScrollDirection::Up.xdotool_button(), 4);
        assert_eq!(ScrollDirection::Right.xdotool_button(), 7);
        assert_eq!(ScrollDirection::Down.button(), Button::WheelDown);
    }
}
