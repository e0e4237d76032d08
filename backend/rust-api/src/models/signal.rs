use serde::{Deserialize, Serialize};

use super::exam::ViolationType;

/// Raw environment event forwarded by the browser adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvSignal {
    FullscreenChange {
        active: bool,
    },
    FullscreenDenied,
    VisibilityChange {
        hidden: bool,
    },
    WindowBlur,
    WindowFocus,
    Copy,
    Paste,
    ContextMenu,
    KeyDown {
        key: String,
        #[serde(default)]
        ctrl: bool,
        #[serde(default)]
        meta: bool,
    },
    PopState,
    BeforeUnload,
}

/// Instruction for the browser adapter to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    PreventDefault,
    Notify { message: String },
    ShowWarning { message: String, grace_seconds: u64 },
    ClearWarning,
    RequestFullscreen,
    ExitFullscreen,
    PushHistoryState,
    ConfirmUnload { message: String },
}

impl Directive {
    pub fn notify(message: &str) -> Self {
        Directive::Notify {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub directives: Vec<Directive>,
    pub lives_remaining: u8,
    pub pending_violation: Option<ViolationType>,
    pub session_active: bool,
}
