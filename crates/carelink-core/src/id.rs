/// Fresh correlation token for an outbound request.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fresh broker message id.
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
