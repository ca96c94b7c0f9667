//! Notification backends for different platforms

use anyhow::{bail, Result};
use std::process::Command;

/// Notification urgency levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// A notification to display
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notification {
    /// Notification title
    pub title: String,
    /// Notification message/body
    pub message: String,
    /// Urgency level
    pub urgency: Urgency,
    /// Auto-dismiss timeout in seconds (optional)
    pub timeout: Option<u32>,
    /// Whether to play a sound
    pub sound: bool,
}

impl Notification {
    /// Create a silent, normal-urgency notification
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: crate::DEFAULT_TITLE.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the urgency. Critical notifications always make a sound.
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        if urgency == Urgency::Critical {
            self.sound = true;
        }
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Available notification backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// macOS osascript
    Osascript,
    /// Linux notify-send (libnotify)
    NotifySend,
    /// Windows toast through powershell.exe, under WSL
    Wsl,
    /// Fallback, prints to stderr
    Echo,
}

impl Backend {
    /// Detect the best available backend for the current platform
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            return Self::Osascript;
        }
        if cfg!(target_os = "linux") {
            if std::env::var_os("WSL_DISTRO_NAME").is_some() {
                return Self::Wsl;
            }
            if command_exists("notify-send") {
                return Self::NotifySend;
            }
        }
        Self::Echo
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Osascript => "osascript",
            Self::NotifySend => "notify-send",
            Self::Wsl => "wsl",
            Self::Echo => "echo",
        }
    }

    /// Program and arguments that display `notification`. `None` means the
    /// stderr fallback.
    fn invocation(&self, notification: &Notification) -> Option<(&'static str, Vec<String>)> {
        match self {
            Self::Osascript => Some((
                "osascript",
                vec!["-e".to_string(), osascript_script(notification)],
            )),
            Self::NotifySend => {
                let mut args = vec![
                    "--app-name".to_string(),
                    crate::DEFAULT_TITLE.to_string(),
                    "--urgency".to_string(),
                    notification.urgency.as_str().to_string(),
                ];
                if let Some(timeout) = notification.timeout {
                    args.push("--expire-time".to_string());
                    args.push((u64::from(timeout) * 1000).to_string());
                }
                args.push(notification.title.clone());
                args.push(notification.message.clone());
                Some(("notify-send", args))
            }
            Self::Wsl => Some((
                "powershell.exe",
                vec!["-Command".to_string(), toast_script(notification)],
            )),
            Self::Echo => None,
        }
    }

    /// Send a notification using this backend
    pub fn send(&self, notification: &Notification) -> Result<()> {
        let Some((program, args)) = self.invocation(notification) else {
            eprintln!("{}", fallback_line(notification));
            return Ok(());
        };

        let status = Command::new(program).args(&args).status()?;
        if status.success() {
            return Ok(());
        }

        // Toasts fail on hosts without a desktop session
        if *self == Self::Wsl {
            eprintln!("{}", fallback_line(notification));
            return Ok(());
        }
        bail!("{} failed with status: {}", program, status)
    }
}

fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn osascript_script(notification: &Notification) -> String {
    let quote = |text: &str| text.replace('\\', "\\\\").replace('"', "\\\"");

    let mut script = format!(
        r#"display notification "{}" with title "{}""#,
        quote(&notification.message),
        quote(&notification.title)
    );
    if notification.sound {
        let sound = match notification.urgency {
            Urgency::Critical => "Basso",
            Urgency::Normal => "default",
        };
        script.push_str(&format!(r#" sound name "{}""#, sound));
    }
    script
}

fn toast_script(notification: &Notification) -> String {
    // PowerShell single-quoted strings escape ' as ''
    let quote = |text: &str| text.replace('\'', "''");

    format!(
        r#"[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null; $template = [Windows.UI.Notifications.ToastNotificationManager]::GetTemplateContent([Windows.UI.Notifications.ToastTemplateType]::ToastText02); $text = $template.GetElementsByTagName('text'); $text[0].AppendChild($template.CreateTextNode('{}')) | Out-Null; $text[1].AppendChild($template.CreateTextNode('{}')) | Out-Null; [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{}').Show([Windows.UI.Notifications.ToastNotification]::new($template))"#,
        quote(&notification.title),
        quote(&notification.message),
        crate::DEFAULT_TITLE
    )
}

// stdout may carry the line protocol, so the fallback goes to stderr
fn fallback_line(notification: &Notification) -> String {
    let marker = match notification.urgency {
        Urgency::Critical => " [!]",
        Urgency::Normal => "",
    };
    format!("[{}]{} {}", notification.title, marker, notification.message)
}
