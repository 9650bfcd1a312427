//! Tests for the hook-relay-core library module.

use super::*;

#[test]
fn test_source_round_trips_through_string_form() {
    for source in [Source::Slack, Source::Calendly, Source::Unknown] {
        let parsed: Source = source.as_str().parse().unwrap();
        assert_eq!(parsed, source);
    }

    assert!("github".parse::<Source>().is_err());
    assert_eq!(" Slack ".parse::<Source>().unwrap(), Source::Slack);
}

#[test]
fn test_confidence_orders_by_strength() {
    assert!(Confidence::None < Confidence::Low);
    assert!(Confidence::Low < Confidence::Medium);
    assert!(Confidence::Medium < Confidence::High);
    assert_eq!(
        [Confidence::Medium, Confidence::High, Confidence::None]
            .into_iter()
            .max(),
        Some(Confidence::High)
    );
}

#[test]
fn test_event_identity_from_parts_prefixes_source() {
    let identity = EventIdentity::from_parts(Source::Slack, &["T1", "C1", "1700000000.000100"]);

    assert_eq!(identity.as_str(), "slack:T1:C1:1700000000.000100");
}

#[test]
fn test_environment_parsing_and_production_flag() {
    assert_eq!(
        "prod".parse::<Environment>().unwrap(),
        Environment::Production
    );
    assert_eq!(
        "Staging".parse::<Environment>().unwrap(),
        Environment::Staging
    );
    assert!("qa".parse::<Environment>().is_err());

    assert!(Environment::Production.is_production());
    assert!(!Environment::Staging.is_production());
    assert!(!Environment::Development.is_production());
    assert_eq!(Environment::default(), Environment::Development);
}

#[test]
fn test_environment_deserializes_lowercase_and_aliases() {
    let env: Environment = serde_json::from_str("\"production\"").unwrap();
    assert_eq!(env, Environment::Production);

    let env: Environment = serde_json::from_str("\"dev\"").unwrap();
    assert_eq!(env, Environment::Development);
}

#[test]
fn test_timestamp_duration_since_is_saturating() {
    let earlier = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
    let later = Timestamp::from_rfc3339("2024-01-01T00:00:05Z").unwrap();

    assert_eq!(later.duration_since(earlier), Duration::from_secs(5));
    assert_eq!(earlier.duration_since(later), Duration::ZERO);
    assert_eq!(later.unix_seconds() - earlier.unix_seconds(), 5);
}
