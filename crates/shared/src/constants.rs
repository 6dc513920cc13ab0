/// Maximum plaintext size accepted for a single message in bytes.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 64 * 1024;
/// Maximum length for a content type label attached to a message.
pub const MAX_CONTENT_TYPE_LENGTH: usize = 64;
