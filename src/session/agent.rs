//! Best-effort user-agent classification for the session snapshot.

/// Browser, OS and device family extracted from a `User-Agent` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
}

pub fn parse_user_agent(user_agent: &str) -> ClientInfo {
    ClientInfo {
        browser: browser_family(user_agent).map(str::to_string),
        os: os_family(user_agent).map(str::to_string),
        device: Some(device_family(user_agent).to_string()),
    }
}

// Order matters: Chrome claims "Safari", Edge and Opera claim "Chrome".
fn browser_family(ua: &str) -> Option<&'static str> {
    if ua.contains("Edg/") || ua.contains("Edge/") {
        Some("Edge")
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Some("Opera")
    } else if ua.contains("Firefox/") {
        Some("Firefox")
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        Some("Chrome")
    } else if ua.contains("Safari/") {
        Some("Safari")
    } else {
        None
    }
}

// Android UAs also contain "Linux"; check the specific names first.
fn os_family(ua: &str) -> Option<&'static str> {
    if ua.contains("Windows NT") {
        Some("Windows")
    } else if ua.contains("Android") {
        Some("Android")
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        Some("iOS")
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        Some("macOS")
    } else if ua.contains("Linux") {
        Some("Linux")
    } else {
        None
    }
}

fn device_family(ua: &str) -> &'static str {
    if ua.contains("iPad") || ua.contains("Tablet") {
        "tablet"
    } else if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("Android") {
        "mobile"
    } else {
        "desktop"
    }
}
