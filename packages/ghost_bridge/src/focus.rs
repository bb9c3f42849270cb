/// AppleScript that raises `app`. Quotes in the name are dropped so the
/// script cannot be broken out of.
fn activate_script(app: &str) -> String {
    let app: String = app.chars().filter(|c| *c != '"' && *c != '\\').collect();
    format!("tell application \"{app}\" to activate")
}

/// Best-effort raise of `app`'s window. Fire and forget; never blocks.
pub fn bring_to_front(app: &str) {
    #[cfg(target_os = "macos")]
    {
        let script = activate_script(app);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            match tokio::process::Command::new("osascript")
                .args(["-e", &script])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await
            {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::debug!("osascript exited with {}", status),
                Err(e) => tracing::debug!("Failed to run osascript: {}", e),
            }
        });
    }
    #[cfg(not(target_os = "macos"))]
    {
        tracing::trace!(script = %activate_script(app), "window raising is macOS-only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_the_app() {
        assert_eq!(
            activate_script("Visual Studio Code"),
            "tell application \"Visual Studio Code\" to activate"
        );
    }

    #[test]
    fn script_strips_quotes() {
        assert_eq!(
            activate_script("Evil\" to quit\\"),
            "tell application \"Evil to quit\" to activate"
        );
    }
}
