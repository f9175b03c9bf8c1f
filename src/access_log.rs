use colored::{ColoredString, Colorize};
use http::{Method, StatusCode};

/// One completed request through a port router.
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub canister_id: &'a str,
    pub port: u16,
    pub method: &'a Method,
    /// Request target as the client sent it.
    pub original: &'a str,
    /// Request target after the canister id was added.
    pub rewritten: &'a str,
    /// Full url the request went to.
    pub forwarded: &'a str,
    pub status: StatusCode,
}

impl AccessEntry<'_> {
    pub fn rewritten_path(&self) -> &str {
        self.rewritten
            .split_once('?')
            .map_or(self.rewritten, |(path, _)| path)
    }

    /// Emits the access line, at error level for 5xx, warn for 4xx and info
    /// otherwise.
    pub fn log(&self) {
        let colored = colored_status(self.status);
        let path = self.rewritten_path();
        let status = self.status.as_u16();
        let Self {
            canister_id,
            port,
            method,
            original,
            rewritten,
            forwarded,
            ..
        } = *self;

        macro_rules! access {
            ($level:ident) => {
                tracing::$level!(
                    canister_id = %canister_id,
                    port,
                    path = %path,
                    method = %method,
                    original = %original,
                    rewritten = %rewritten,
                    forwarded = %forwarded,
                    status,
                    "{} {} -> {} {}",
                    method,
                    original,
                    forwarded,
                    colored
                )
            };
        }

        if self.status.is_server_error() {
            access!(error);
        } else if self.status.is_client_error() {
            access!(warn);
        } else {
            access!(info);
        }
    }
}

/// Status code painted by class so failures stand out when scanning output.
pub fn colored_status(status: StatusCode) -> ColoredString {
    let text = status.as_u16().to_string();

    if status.is_success() {
        text.green()
    } else if status.is_redirection() {
        text.cyan()
    } else if status.is_client_error() {
        text.yellow()
    } else if status.is_server_error() {
        text.red().bold()
    } else {
        text.normal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_follow_status_class() {
        assert_eq!(colored_status(StatusCode::OK), "200".green());
        assert_eq!(colored_status(StatusCode::NOT_MODIFIED), "304".cyan());
        assert_eq!(colored_status(StatusCode::NOT_FOUND), "404".yellow());
        assert_eq!(colored_status(StatusCode::BAD_GATEWAY), "502".red().bold());
        assert_eq!(colored_status(StatusCode::CONTINUE), "100".normal());
    }

    #[test]
    fn rewritten_path_drops_query() {
        let entry = AccessEntry {
            canister_id: "abc",
            port: 8080,
            method: &Method::GET,
            original: "/foo?bar=1",
            rewritten: "/foo?bar=1&canisterId=abc",
            forwarded: "http://localhost:8000/foo?bar=1&canisterId=abc",
            status: StatusCode::OK,
        };

        assert_eq!(entry.rewritten_path(), "/foo");
    }
}
