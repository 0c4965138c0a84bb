use blog_server::storage::{MockStorageService, S3StorageClient, StorageService, sanitize_key};

#[cfg(test)]
mod mock_tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_put_and_sign() {
        let mock = MockStorageService::new();
        let key = mock
            .put_object("profile_pics/a.png", "image/png", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(key, "profile_pics/a.png");
        assert_eq!(
            mock.object(&key),
            Some(("image/png".to_string(), vec![1, 2, 3]))
        );

        let url = mock.get_presigned_download_url(&key).await.unwrap();
        assert!(url.contains("signature=fake"));
        assert!(url.contains(&key));
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockStorageService::new_failing();
        assert!(mock.put_object("a.png", "image/png", vec![]).await.is_err());
        assert!(mock.get_presigned_download_url("a.png").await.is_err());
        assert_eq!(mock.object_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_delete_removes_object() {
        let mock = MockStorageService::new();
        let key = mock
            .put_object("profile_pics/a.png", "image/png", vec![1])
            .await
            .unwrap();
        mock.delete_object(&key).await.unwrap();
        assert_eq!(mock.object(&key), None);
        assert_eq!(mock.object_count(), 0);

        // Deleting again is not an error.
        assert!(mock.delete_object(&key).await.is_ok());
        assert!(MockStorageService::new_failing().delete_object(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_sanitizes_keys() {
        let mock = MockStorageService::new();
        let key = mock
            .put_object("../../etc/passwd", "text/plain", vec![0])
            .await
            .unwrap();
        assert_eq!(key, "etc/passwd");
        assert!(!key.contains(".."));
    }

    #[tokio::test]
    async fn test_mock_clones_share_objects() {
        let mock = MockStorageService::new();
        let handle = mock.clone();
        mock.put_object("x.png", "image/png", vec![9]).await.unwrap();
        assert_eq!(handle.object_count(), 1);
    }
}

#[test]
fn test_sanitize_key() {
    assert_eq!(sanitize_key("profile_pics/me.png"), "profile_pics/me.png");
    assert_eq!(sanitize_key("/profile_pics//./me.png"), "profile_pics/me.png");
    assert_eq!(sanitize_key("../../secret"), "secret");
}

#[cfg(test)]
mod s3_tests {
    use super::*;

    #[tokio::test]
    async fn test_s3_presigned_download_url_format() {
        let client = S3StorageClient::new(
            "http://localhost:9000",
            "us-east-1",
            "testkey",
            "testsecret",
            "testbucket",
        )
        .await;

        // Presigning is local computation; no server is contacted.
        let url = client
            .get_presigned_download_url("profile_pics/me.png")
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/testbucket/profile_pics/me.png"));
        assert!(url.contains("X-Amz-Signature"));
        assert!(url.contains("X-Amz-Expires=600"));
    }
}
