#[cfg(test)]
pub mod tests {
    use crate::context::{ExecutionContext, RecordingHost};
    use crate::frame::FrameMetadata;
    use crate::settings::Settings;

    pub fn crate_test_settings_str() -> String {
        r#"
            [frame]
            third_party_host = "3p.frame.test"
            third_party_frame_pattern = '^d-\d+\.frame\.test$'
            proxy_origin_pattern = '^https://([a-zA-Z0-9-]+\.)*cdn\.frame\.test$'
            error_reporting_url = "https://errors.frame.test/r"
            runtime_version = "1234"
            default_allowed_types_in_custom_frame = ["_ping_", "twitter"]
            amp_embed_allowed = ["_ping_", "taboola"]
            "#
        .to_string()
    }

    pub fn create_test_settings() -> Settings {
        Settings::from_toml(&crate_test_settings_str()).expect("Invalid config")
    }

    /// Metadata of a frame served from the default third-party host.
    pub fn framed_metadata() -> FrameMetadata {
        FrameMetadata {
            frame_location: "https://3p.frame.test/frame.html".to_string(),
            location: Some("https://publisher.test/article.html".to_string()),
            referrer: Some("https://publisher.test/article.html".to_string()),
            ancestor_origins: vec!["https://publisher.test".to_string()],
            ..FrameMetadata::default()
        }
    }

    pub fn create_test_context() -> (ExecutionContext, RecordingHost) {
        let host = RecordingHost::new();
        let ctx = ExecutionContext::new(framed_metadata(), Box::new(host.clone()));
        (ctx, host)
    }
}
