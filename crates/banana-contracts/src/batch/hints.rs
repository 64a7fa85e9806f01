const FAILURE_HINTS: [(&str, &str); 6] = [
    ("PERMISSION_DENIED", "API key rejected or missing access"),
    ("RESOURCE_EXHAUSTED", "rate limit reached; wait and retry"),
    ("INVALID_ARGUMENT", "request or prompt blocked; adjust the prompt"),
    ("INTERNAL", "service-side error; retry later"),
    ("UNAVAILABLE", "service unavailable or overloaded; retry later"),
    ("connection", "network connection problem"),
];

/// Short human hint for a worker failure message, matched case-insensitively
/// against well-known service error markers.
pub fn failure_hint(message: &str) -> Option<&'static str> {
    let lowered = message.to_ascii_lowercase();
    FAILURE_HINTS
        .iter()
        .find(|(marker, _)| lowered.contains(&marker.to_ascii_lowercase()))
        .map(|(_, hint)| *hint)
}

#[cfg(test)]
mod tests {
    use super::failure_hint;

    #[test]
    fn known_markers_map_to_hints() {
        assert_eq!(
            failure_hint("Gemini request failed (429): RESOURCE_EXHAUSTED quota"),
            Some("rate limit reached; wait and retry")
        );
        assert_eq!(
            failure_hint("error sending request: Connection refused"),
            Some("network connection problem")
        );
        assert_eq!(failure_hint("blocked"), None);
    }
}
