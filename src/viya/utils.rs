#[derive(Debug, thiserror::Error)]
#[error("{status_code} status code")]
pub struct ServerError {
    pub status_code: u16,
    /// Response body as text, kept for diagnostics.
    pub body: String,
}

/// Pass successful responses through, turn everything else into a [`ServerError`].
pub async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ServerError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = describe_body(res.text().await);
    Err(ServerError {
        status_code: status.as_u16(),
        body,
    })
}

fn describe_body(text: reqwest::Result<String>) -> String {
    text.unwrap_or_else(|err| format!("<unreadable body: {}>", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_body_keeps_the_read_error() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        let body = describe_body(Err(err));
        assert!(body.starts_with("<unreadable body: "), "{}", body);
        assert!(body.len() > "<unreadable body: >".len());
    }

    #[test]
    fn readable_body_is_kept_as_is() {
        assert_eq!(describe_body(Ok("{\"error\":\"denied\"}".into())), "{\"error\":\"denied\"}");
    }
}
