//! Tests for the ledger identifier types
//!
//! Covers creation, parsing, display formatting, ordering, and the
//! uniqueness of prefixes across entity types.

use core_kernel::{
    PayerId, CatalogItemId, BillingPeriodId, InvoiceId, InvoiceLineId,
    DiscountId, StudentDiscountId, PaymentId, CreditAllocationId,
};
use uuid::Uuid;

mod invoice_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let id1 = InvoiceId::new();
        let id2 = InvoiceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_generates_time_ordered_ids() {
        let id1 = InvoiceId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = InvoiceId::new();
        assert!(id1 < id2);
        assert_eq!(id1.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_display_format() {
        let id = InvoiceId::new();
        assert!(id.to_string().starts_with("INV-"));
    }

    #[test]
    fn test_from_str_with_and_without_prefix() {
        let original = InvoiceId::new();
        let with_prefix: InvoiceId = original.to_string().parse().unwrap();
        let bare: InvoiceId = original.as_uuid().to_string().parse().unwrap();
        assert_eq!(original, with_prefix);
        assert_eq!(original, bare);
    }

    #[test]
    fn test_json_is_transparent() {
        let id = InvoiceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let deserialized: InvoiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}

mod ordering_tests {
    use super::*;

    #[test]
    fn test_ids_sort_by_underlying_uuid() {
        let low = InvoiceLineId::from_uuid(Uuid::from_u128(1));
        let high = InvoiceLineId::from_uuid(Uuid::from_u128(2));
        let mut ids = vec![high, low];
        ids.sort();
        assert_eq!(ids, vec![low, high]);
    }
}

mod cross_type_tests {
    use super::*;

    #[test]
    fn test_id_prefixes_are_unique() {
        let prefixes = vec![
            PayerId::prefix(),
            CatalogItemId::prefix(),
            BillingPeriodId::prefix(),
            InvoiceId::prefix(),
            InvoiceLineId::prefix(),
            DiscountId::prefix(),
            StudentDiscountId::prefix(),
            PaymentId::prefix(),
            CreditAllocationId::prefix(),
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(unique.len(), prefixes.len());
    }

    #[test]
    fn test_wrong_uuid_text_fails_to_parse() {
        let result: Result<PaymentId, _> = "PAY-not-a-uuid".parse();
        assert!(result.is_err());
    }
}
