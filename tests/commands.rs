use parley::{parse_service_frame, validate_nickname, ServiceCommand};

#[test]
fn parses_bare_commands() {
    assert_eq!(parse_service_frame("\\help\n"), Some(ServiceCommand::Help));
    assert_eq!(
        parse_service_frame("\\listall\n"),
        Some(ServiceCommand::ListAll)
    );
    assert_eq!(parse_service_frame("\\quit\n"), Some(ServiceCommand::Quit));
    assert_eq!(parse_service_frame("\\intro\n"), Some(ServiceCommand::Intro));
}

#[test]
fn accepts_crlf_terminated_frames() {
    assert_eq!(parse_service_frame("\\quit\r\n"), Some(ServiceCommand::Quit));
}

#[test]
fn parses_nickname_argument() {
    assert_eq!(
        parse_service_frame("\\nickname alice\n"),
        Some(ServiceCommand::Nickname("alice".to_string()))
    );
    // missing argument is caught later by validation, not by the grammar
    assert_eq!(
        parse_service_frame("\\nickname\n"),
        Some(ServiceCommand::Nickname(String::new()))
    );
}

#[test]
fn parses_private_target_and_tail() {
    assert_eq!(
        parse_service_frame("\\private bob hi there\n"),
        Some(ServiceCommand::Private {
            target: "bob".to_string(),
            text: "hi there".to_string(),
        })
    );
}

#[test]
fn non_alphanumeric_token_belongs_to_the_tail() {
    // mirrors the grammar: the argument slot takes one alphanumeric token
    assert_eq!(
        parse_service_frame("\\private bob!x hi\n"),
        Some(ServiceCommand::Private {
            target: String::new(),
            text: "bob!x hi".to_string(),
        })
    );
}

#[test]
fn malformed_frames_fall_through() {
    // unknown command name
    assert_eq!(parse_service_frame("\\frobnicate\n"), None);
    // garbage glued to the command name
    assert_eq!(parse_service_frame("\\nick!name\n"), None);
    // not a service frame at all
    assert_eq!(parse_service_frame("hello\n"), None);
    // missing terminator
    assert_eq!(parse_service_frame("\\help"), None);
    // sentinel alone
    assert_eq!(parse_service_frame("\\\n"), None);
}

#[test]
fn command_names_are_case_sensitive() {
    assert_eq!(parse_service_frame("\\HELP\n"), None);
    assert_eq!(parse_service_frame("\\Quit\n"), None);
}

#[test]
fn nickname_validation_limits() {
    assert!(validate_nickname("alice").is_ok());
    assert!(validate_nickname(&"a".repeat(50)).is_ok());

    assert!(validate_nickname("").is_err());
    assert!(validate_nickname(&"a".repeat(51)).is_err());
    assert!(validate_nickname("SERVER").is_err());
    assert!(validate_nickname("server").is_err());
}
