use parley::{parse_request, Request};

#[test]
fn parses_register_request() {
    assert_eq!(
        parse_request("REGISTER username=John; email=john@a.com"),
        Some(Request::Register {
            username: "John".to_string(),
            email: "john@a.com".to_string(),
        })
    );
}

#[test]
fn parses_get_request() {
    assert_eq!(
        parse_request("GET username=John"),
        Some(Request::Get {
            username: "John".to_string(),
        })
    );
}

#[test]
fn verbs_and_keys_are_case_insensitive() {
    assert_eq!(
        parse_request("register USERNAME = Bob ; EMAIL = b@c.de"),
        Some(Request::Register {
            username: "Bob".to_string(),
            email: "b@c.de".to_string(),
        })
    );
    assert_eq!(
        parse_request("get Username=bob"),
        Some(Request::Get {
            username: "bob".to_string(),
        })
    );
}

#[test]
fn blanks_are_tolerated_everywhere() {
    assert_eq!(
        parse_request("  REGISTER   username =  John Smith ;  email =  j@s.com  "),
        Some(Request::Register {
            username: "John Smith".to_string(),
            email: "j@s.com".to_string(),
        })
    );
}

#[test]
fn verb_must_be_separated_from_arguments() {
    assert_eq!(parse_request("REGISTERusername=x; email=y@z.com"), None);
    assert_eq!(parse_request("GETusername=x"), None);
}

#[test]
fn unknown_or_malformed_requests_are_rejected() {
    assert_eq!(parse_request("DELETE username=x"), None);
    assert_eq!(parse_request("REGISTER username=x email=y@z.com"), None); // missing ';'
    assert_eq!(parse_request("REGISTER username=x; mail=y@z.com"), None);
    assert_eq!(parse_request("GET user=x"), None);
    assert_eq!(parse_request(""), None);
}

#[test]
fn argument_values_pass_through_unvalidated() {
    // the repository owns validation; the grammar only carves out the values
    assert_eq!(
        parse_request("REGISTER username=x; email="),
        Some(Request::Register {
            username: "x".to_string(),
            email: String::new(),
        })
    );
}
