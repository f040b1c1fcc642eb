/// Formats a number of seconds as a clock string.
///
/// Values of an hour or more render as `H:MM:SS`, shorter ones as `M:SS`.
/// Only the leading field is unpadded.
pub fn format_clock(seconds: u32) -> String {
    format_clock_with_hours(seconds, seconds >= 3600)
}

/// Like [`format_clock`] but lets the caller pin the hour field, so a
/// countdown that started above an hour keeps the `H:MM:SS` shape.
pub fn format_clock_with_hours(seconds: u32, show_hours: bool) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if show_hours {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", seconds / 60, secs)
    }
}
