use crate::db::types::ViolationSeverity;

/// Proctoring signal reported by the client. Unrecognised kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ViolationKind {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    CopyPaste,
    RightClick,
    KeyboardShortcut,
    DeveloperTools,
    MultipleFacesDetected,
    NoFaceDetected,
    ExternalDisplay,
    VoiceDetected,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Classification {
    pub(crate) severity: ViolationSeverity,
    pub(crate) description: String,
}

impl ViolationKind {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tab_switch" => Self::TabSwitch,
            "window_blur" => Self::WindowBlur,
            "fullscreen_exit" => Self::FullscreenExit,
            "copy_paste" => Self::CopyPaste,
            "right_click" => Self::RightClick,
            "keyboard_shortcut" => Self::KeyboardShortcut,
            "developer_tools" | "devtools" => Self::DeveloperTools,
            "multiple_faces_detected" | "multiple_faces" => Self::MultipleFacesDetected,
            "no_face_detected" | "no_face" => Self::NoFaceDetected,
            "external_display" => Self::ExternalDisplay,
            "voice_detected" => Self::VoiceDetected,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::TabSwitch => "tab_switch",
            Self::WindowBlur => "window_blur",
            Self::FullscreenExit => "fullscreen_exit",
            Self::CopyPaste => "copy_paste",
            Self::RightClick => "right_click",
            Self::KeyboardShortcut => "keyboard_shortcut",
            Self::DeveloperTools => "developer_tools",
            Self::MultipleFacesDetected => "multiple_faces_detected",
            Self::NoFaceDetected => "no_face_detected",
            Self::ExternalDisplay => "external_display",
            Self::VoiceDetected => "voice_detected",
            Self::Other(raw) => raw,
        }
    }
}

/// Maps a kind to its severity. Never fails: unknown kinds are medium.
pub(crate) fn classify(kind: &ViolationKind) -> Classification {
    let (severity, description) = match kind {
        ViolationKind::TabSwitch => (ViolationSeverity::Medium, "Switched to another tab"),
        ViolationKind::WindowBlur => (ViolationSeverity::Low, "Exam window lost focus"),
        ViolationKind::FullscreenExit => (ViolationSeverity::Medium, "Exited fullscreen mode"),
        ViolationKind::CopyPaste => (ViolationSeverity::High, "Copy or paste attempted"),
        ViolationKind::RightClick => (ViolationSeverity::Low, "Context menu opened"),
        ViolationKind::KeyboardShortcut => {
            (ViolationSeverity::Low, "Blocked keyboard shortcut used")
        }
        ViolationKind::DeveloperTools => {
            (ViolationSeverity::Critical, "Browser developer tools opened")
        }
        ViolationKind::MultipleFacesDetected => {
            (ViolationSeverity::Critical, "More than one face in camera frame")
        }
        ViolationKind::NoFaceDetected => (ViolationSeverity::High, "No face in camera frame"),
        ViolationKind::ExternalDisplay => (ViolationSeverity::High, "Additional display detected"),
        ViolationKind::VoiceDetected => (ViolationSeverity::Medium, "Voices detected nearby"),
        ViolationKind::Other(raw) => {
            return Classification {
                severity: ViolationSeverity::Medium,
                description: format!("Unrecognised proctoring event: {raw}"),
            };
        }
    };

    Classification { severity, description: description.to_string() }
}
