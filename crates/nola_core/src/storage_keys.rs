pub const ARTIFACT_FILE_NAME: &str = "node_modules.zip";
pub const DEPENDENCY_DIR_NAME: &str = "node_modules";
pub const BUCKET_PREFIX: &str = "nola-";
pub const BUCKET_IDENTITY_SUFFIX_LEN: usize = 10;
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Object key for the artifact of one build invocation. The request id is the
/// only namespace, so concurrent builds sharing a bucket never collide.
pub fn artifact_object_key(request_id: &str) -> String {
    format!("{request_id}/{ARTIFACT_FILE_NAME}")
}

/// Bucket name derived from the credential identity (access key id): the
/// prefix plus the last ten characters, lowercased since S3 rejects upper case.
pub fn bucket_name_for_identity(identity: &str) -> String {
    let trimmed = identity.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(BUCKET_IDENTITY_SUFFIX_LEN - 1)
        .map(|(index, _)| index)
        .unwrap_or(0);
    format!("{BUCKET_PREFIX}{}", trimmed[start..].to_ascii_lowercase())
}

pub fn object_url(bucket: &str, region: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}
