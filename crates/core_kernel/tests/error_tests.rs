//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::money::MoneyError;

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("Invalid input");

    match error {
        CoreError::Validation(msg) => assert_eq!(msg, "Invalid input"),
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_core_error_not_found() {
    let error = CoreError::not_found("Payer not found");

    match error {
        CoreError::NotFound(msg) => assert_eq!(msg, "Payer not found"),
        _ => panic!("Expected NotFound error"),
    }
}

#[test]
fn test_core_error_from_money_error() {
    let core_error: CoreError = MoneyError::DivisionByZero.into();

    assert!(matches!(core_error, CoreError::Money(MoneyError::DivisionByZero)));
    assert!(core_error.to_string().contains("Division by zero"));
}

#[test]
fn test_core_error_configuration() {
    let error = CoreError::configuration("BILLING_DEFAULT_DUE_DAYS is not a number");

    assert!(error.to_string().starts_with("Configuration error"));
}
