use super::non_empty_model as non_empty_model_impl;
use super::test_ollama_connection as test_ollama_connection_impl;
use super::*;

#[test]
fn model_names_must_not_be_blank() {
    assert!(non_empty_model_impl(&"llama3".to_string()).is_ok());
    assert!(non_empty_model_impl(&"   ".to_string()).is_err());
}

#[test]
fn unreachable_ollama_reports_false() {
    let ollama = OllamaConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        ..OllamaConfig::default()
    };
    let reachable = test_ollama_connection_impl(&ollama).expect("connection test should not error");
    assert!(!reachable);
}
