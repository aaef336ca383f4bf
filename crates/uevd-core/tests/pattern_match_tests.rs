use uevd_core::pattern::{MatchCase, Pattern};

// ===== GLOB CONTRACT TESTS =====

#[test]
fn test_whole_value_matching_no_partial() {
    let p = Pattern::glob("sda", MatchCase::Sensitive).unwrap();
    assert!(p.matches("sda"));
    assert!(!p.matches("sda1"));
    assert!(!p.matches("xsda"));
    assert!(!p.matches(""));
}

#[test]
fn test_empty_pattern_matches_only_empty_value() {
    let p = Pattern::glob("", MatchCase::Sensitive).unwrap();
    assert!(p.matches(""));
    assert!(!p.matches("sda"));
}

#[test]
fn test_wildcards_compose() {
    let p = Pattern::glob("sd?[0-9]*", MatchCase::Sensitive).unwrap();
    assert!(p.matches("sda1"));
    assert!(p.matches("sdb22"));
    assert!(!p.matches("sda"));
    assert!(!p.matches("sdaa"));
}

#[test]
fn test_alternation_is_whole_value_per_branch() {
    let p = Pattern::glob("sda|sdb*", MatchCase::Sensitive).unwrap();
    assert!(p.matches("sda"));
    assert!(p.matches("sdb7"));
    assert!(!p.matches("sda7"));
}

#[test]
fn test_negated_set() {
    let p = Pattern::glob("ram[!0-9]", MatchCase::Sensitive).unwrap();
    assert!(p.matches("ramx"));
    assert!(!p.matches("ram1"));
    assert!(!p.matches("ram"));
}

#[test]
fn test_case_sensitivity_is_opt_out() {
    let sensitive = Pattern::glob("ttyUSB*", MatchCase::Sensitive).unwrap();
    let insensitive = Pattern::glob("ttyUSB*", MatchCase::Insensitive).unwrap();
    assert!(sensitive.matches("ttyUSB0"));
    assert!(!sensitive.matches("TTYUSB0"));
    assert!(insensitive.matches("TTYUSB0"));
}

// ===== LOAD-TIME ERROR TESTS =====

#[test]
fn test_malformed_bracket_fails_at_compile_not_match() {
    // An unterminated set must be rejected at compile (rule load) time
    // rather than compiling to something that silently never matches.
    let result = Pattern::glob("sd[abc", MatchCase::Sensitive);
    assert!(result.is_err());
    let err = result.unwrap_err().to_string();
    assert!(err.contains("sd[abc"));
}

#[test]
fn test_empty_bracket_set_rejected() {
    assert!(Pattern::glob("sd[]", MatchCase::Sensitive).is_err());
}

// ===== REGEX OPERATOR TESTS =====

#[test]
fn test_regex_is_anchored_both_ends() {
    let p = Pattern::regex("(sd|hd)[a-z]", MatchCase::Sensitive).unwrap();
    assert!(p.matches("sda"));
    assert!(p.matches("hdb"));
    assert!(!p.matches("sda1"));
    assert!(!p.matches("0sda"));
}

#[test]
fn test_regex_compile_error_carries_pattern() {
    let err = Pattern::regex("(unclosed", MatchCase::Sensitive).unwrap_err();
    assert!(err.to_string().contains("(unclosed"));
}
