fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bytelift_protocol::{
        BeginMultipartUploadRequest, BeginMultipartUploadResponse, CompleteMultipartUploadResponse,
        CompleteUploadPartRequest, ErrorResponse, FilePathDefinition, MultipartUploadProtocol,
        PartCompletionStatus, UploadPart, UploadProgress, UploadedFile,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it and requires the same JSON back.
    ///
    /// Returns the parsed value for further checks.
    fn roundtrip<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Begin ---

    #[test]
    fn fixture_begin_request() {
        let req: BeginMultipartUploadRequest = roundtrip("begin_request.json");
        assert_eq!(req.protocol, Some(MultipartUploadProtocol::V1_1));
        match req.path {
            Some(FilePathDefinition::Dynamic(path)) => {
                assert_eq!(path.folder_path.as_deref(), Some("/uploads/{UTC_YEAR}"));
                assert_eq!(path.file_name_variables_enabled, Some(true));
                assert!(path.file_name_fallback.is_none());
            }
            other => panic!("expected dynamic path, got {other:?}"),
        }
    }

    #[test]
    fn fixture_begin_request_minimal() {
        let req: BeginMultipartUploadRequest = roundtrip("begin_request_minimal.json");
        assert_eq!(req.size, 0);
        assert!(req.mime.is_none());
        assert!(req.protocol.is_none());
    }

    #[test]
    fn fixture_begin_request_absolute_path() {
        let req: BeginMultipartUploadRequest = roundtrip("begin_request_absolute_path.json");
        assert_eq!(
            req.path,
            Some(FilePathDefinition::Absolute("/notes/hello.txt".into()))
        );
        assert_eq!(req.protocol, Some(MultipartUploadProtocol::V1_0));
    }

    #[test]
    fn fixture_begin_response() {
        let resp: BeginMultipartUploadResponse = roundtrip("begin_response.json");
        assert_eq!(resp.upload_parts.count, 2);
        assert_eq!(resp.upload_parts.first.upload_part_index, 0);
        assert_eq!(resp.upload_parts.first.range.len(), 5_242_880);
        assert!(resp.file.etag.is_none());
    }

    // --- Parts ---

    #[test]
    fn fixture_upload_part() {
        let part: UploadPart = roundtrip("upload_part.json");
        assert_eq!(part.range.end_exclusive(), 10_485_760);
    }

    #[test]
    fn fixture_upload_part_empty() {
        let part: UploadPart = roundtrip("upload_part_empty.json");
        assert!(part.range.is_empty());
        assert_eq!(part.range.end_exclusive(), 0);
    }

    #[test]
    fn fixture_complete_part_request() {
        let req: CompleteUploadPartRequest = roundtrip("complete_part_request.json");
        assert!(req.etag.starts_with('"'));
    }

    #[test]
    fn fixture_complete_response_pending() {
        let resp: CompleteMultipartUploadResponse = roundtrip("complete_response_pending.json");
        assert_eq!(resp.status, PartCompletionStatus::Pending);
        assert_eq!(resp.completed_etag(), None);
    }

    #[test]
    fn fixture_complete_response_completed() {
        let resp: CompleteMultipartUploadResponse = roundtrip("complete_response_completed.json");
        assert_eq!(
            resp.completed_etag(),
            Some("33a64df551425fcc55e4d42a148795d9f25f89d4")
        );
    }

    // --- Results ---

    #[test]
    fn fixture_uploaded_file() {
        let file: UploadedFile = roundtrip("uploaded_file.json");
        assert!(file.original_file_name.is_none());
        assert_eq!(file.size, 2048);
    }

    #[test]
    fn fixture_upload_progress() {
        let progress: UploadProgress = roundtrip("upload_progress.json");
        assert_eq!(progress, UploadProgress::new(5_242_880, 10_485_760));
    }

    #[test]
    fn fixture_error_response() {
        let err: ErrorResponse = roundtrip("error_response.json");
        assert_eq!(err.error.code, "upload_part_not_found");
        assert!(err.error.details.is_some());
    }

    #[test]
    fn all_fixtures_covered() {
        let mut names: Vec<String> = fs::read_dir(fixtures_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 12, "unexpected fixtures: {names:?}");
    }
}
