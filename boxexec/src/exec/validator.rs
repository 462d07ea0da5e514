//! Request validation.
//!
//! Everything here is pure: a rejected request never reaches the store.

use super::state::{ExecConfig, ExecUser};
use boxexec_shared::constants::{media, messages};
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use boxexec_shared::wire::{ExecCreateRequest, ExecStartRequest};
use serde::de::DeserializeOwned;

/// Check the request media type.
///
/// A missing content type is only acceptable when there is no body. Otherwise
/// the media type, ignoring parameters and case, must be `application/json`.
pub fn check_content_type(content_type: Option<&str>, body: &[u8]) -> BoxexecResult<()> {
    let content_type = content_type.map(str::trim).unwrap_or_default();
    if content_type.is_empty() {
        if body.is_empty() {
            return Ok(());
        }
        return Err(BoxexecError::UnsupportedMediaType(String::new()));
    }

    let essence = content_type
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if essence.eq_ignore_ascii_case(media::JSON) {
        Ok(())
    } else {
        Err(BoxexecError::UnsupportedMediaType(content_type.to_string()))
    }
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> BoxexecResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice::<Option<T>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| BoxexecError::InvalidRequest(e.to_string()))
}

/// Decode an exec create body. An empty or `null` body decodes to the defaults.
pub fn parse_create_body(body: &[u8]) -> BoxexecResult<ExecCreateRequest> {
    parse_body(body)
}

/// Decode an exec start body. An empty body means attached.
pub fn parse_start_body(body: &[u8]) -> BoxexecResult<ExecStartRequest> {
    parse_body(body)
}

/// Turn a decoded create request into a normalized [`ExecConfig`].
pub fn validate_create(container_ref: &str, req: ExecCreateRequest) -> BoxexecResult<ExecConfig> {
    let command = req.cmd.unwrap_or_default();
    if command.is_empty() {
        return Err(BoxexecError::InvalidRequest(
            messages::NO_EXEC_COMMAND.to_string(),
        ));
    }

    let env = req
        .env
        .unwrap_or_default()
        .into_iter()
        .map(|entry| parse_env(&entry))
        .collect::<BoxexecResult<Vec<_>>>()?;

    let working_dir = match req.working_dir.filter(|d| !d.is_empty()) {
        Some(dir) if !dir.starts_with('/') => {
            return Err(BoxexecError::InvalidRequest(format!(
                "the working directory '{}' is invalid, it needs to be an absolute path",
                dir
            )));
        }
        other => other,
    };

    let user = match req.user.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(spec) => Some(parse_user(spec)?),
    };

    Ok(ExecConfig {
        container_ref: container_ref.to_string(),
        command,
        env,
        working_dir,
        user,
        tty: req.tty,
        privileged: req.privileged,
        attach_stdin: req.attach_stdin,
        attach_stdout: req.attach_stdout,
        attach_stderr: req.attach_stderr,
    })
}

fn parse_env(entry: &str) -> BoxexecResult<(String, String)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(BoxexecError::InvalidRequest(format!(
            "invalid environment variable: {}",
            entry
        ))),
    }
}

/// Parse `uid[:gid]`. `root` is accepted as uid 0.
fn parse_user(spec: &str) -> BoxexecResult<ExecUser> {
    let invalid = || {
        BoxexecError::InvalidRequest(format!(
            "unable to find user {}: only numeric uid[:gid] is supported",
            spec
        ))
    };

    let (uid, gid) = match spec.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (spec, None),
    };
    let uid = match uid {
        "root" => 0,
        other => other.parse::<u32>().map_err(|_| invalid())?,
    };
    let gid = match gid {
        Some(gid) => Some(gid.parse::<u32>().map_err(|_| invalid())?),
        None => None,
    };

    Ok(ExecUser { uid, gid })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cmd: Option<&[&str]>) -> ExecCreateRequest {
        ExecCreateRequest {
            cmd: cmd.map(|c| c.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_content_type_json_variants() {
        let body = br#"{"Cmd": ["true"]}"#;
        assert!(check_content_type(Some("application/json"), body).is_ok());
        assert!(check_content_type(Some("application/json; charset=utf-8"), body).is_ok());
        assert!(check_content_type(Some("Application/JSON"), body).is_ok());
    }

    #[test]
    fn test_content_type_rejects_text_plain() {
        let err = check_content_type(Some("text/plain"), b"{}").unwrap_err();
        assert!(matches!(err, BoxexecError::UnsupportedMediaType(ref ct) if ct == "text/plain"));
    }

    #[test]
    fn test_missing_content_type() {
        assert!(check_content_type(None, b"").is_ok());
        assert!(check_content_type(Some(""), b"").is_ok());
        assert!(check_content_type(None, b"{}").is_err());
    }

    #[test]
    fn test_empty_cmd_rejected() {
        for cmd in [None, Some(&[][..])] {
            let err = validate_create("c", request(cmd)).unwrap_err();
            match err {
                BoxexecError::InvalidRequest(msg) => assert_eq!(msg, "No exec command specified"),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_valid_request() {
        let mut req = request(Some(&["ls", "-l"]));
        req.env = Some(vec!["A=1".into(), "EMPTY=".into(), "B=x=y".into()]);
        req.working_dir = Some("/tmp".into());
        req.user = Some("1000:100".into());
        req.tty = true;

        let config = validate_create("web", req).unwrap();
        assert_eq!(config.container_ref, "web");
        assert_eq!(config.command, vec!["ls", "-l"]);
        assert_eq!(
            config.env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("B".to_string(), "x=y".to_string()),
            ]
        );
        assert_eq!(config.working_dir.as_deref(), Some("/tmp"));
        assert_eq!(config.user, Some(ExecUser { uid: 1000, gid: Some(100) }));
        assert!(config.tty);
    }

    #[test]
    fn test_env_without_equals_rejected() {
        let mut req = request(Some(&["true"]));
        req.env = Some(vec!["NOVALUE".into()]);
        assert!(matches!(
            validate_create("c", req),
            Err(BoxexecError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_relative_working_dir_rejected() {
        let mut req = request(Some(&["true"]));
        req.working_dir = Some("tmp".into());
        assert!(validate_create("c", req).is_err());

        let mut req = request(Some(&["true"]));
        req.working_dir = Some(String::new());
        assert_eq!(validate_create("c", req).unwrap().working_dir, None);
    }

    #[test]
    fn test_user_forms() {
        assert_eq!(parse_user("0").unwrap(), ExecUser { uid: 0, gid: None });
        assert_eq!(parse_user("root").unwrap(), ExecUser { uid: 0, gid: None });
        assert_eq!(parse_user("root:5").unwrap(), ExecUser { uid: 0, gid: Some(5) });
        assert!(parse_user("nobody").is_err());
        assert!(parse_user("1:x").is_err());
    }

    #[test]
    fn test_parse_bodies() {
        assert_eq!(parse_create_body(b"").unwrap(), ExecCreateRequest::default());
        assert_eq!(parse_create_body(b"null").unwrap(), ExecCreateRequest::default());
        assert!(!parse_start_body(b" null ").unwrap().detach);
        assert!(parse_create_body(b"{not json").is_err());
        assert!(parse_create_body(br#"{"Cmd": "ls"}"#).is_err());

        let start = parse_start_body(b"  ").unwrap();
        assert!(!start.detach);
        assert!(parse_start_body(br#"{"Detach": true}"#).unwrap().detach);
    }
}
