//! Record invariants asserted by the workflow tests.

use crate::models::{Donation, DonationStatus, Request, RequestStatus};

/// Servings on a donation are a positive integer.
pub fn assert_servings_positive(donation: &Donation) {
    assert!(
        donation.servings > 0,
        "donation {} has non-positive servings ({})",
        donation.id,
        donation.servings
    );
}

/// Quantity on a request is a positive integer.
pub fn assert_quantity_positive(request: &Request) {
    assert!(
        request.quantity > 0,
        "request {} has non-positive quantity ({})",
        request.id,
        request.quantity
    );
}

/// Only `Pending -> Fulfilled` is allowed for requests.
pub fn assert_valid_request_transition(from: RequestStatus, to: RequestStatus) {
    assert!(
        from.can_transition_to(to),
        "invalid request transition from {from:?} to {to:?}"
    );
}

/// A fulfilled request carries who fulfilled it and when.
pub fn assert_fulfilment_recorded(request: &Request) {
    if request.status == RequestStatus::Fulfilled {
        assert!(
            request.fulfilled_by.is_some() && request.fulfilled_at.is_some(),
            "request {} is Fulfilled without fulfilledBy/fulfilledAt",
            request.id
        );
    }
}

/// A fulfilled request has exactly one linked donation, and it is past
/// `Available`.
pub fn assert_claim_linkage(request: &Request, linked: &[Donation]) {
    assert_eq!(
        request.status,
        RequestStatus::Fulfilled,
        "request {} is not Fulfilled",
        request.id
    );
    assert_eq!(
        linked.len(),
        1,
        "request {} has {} linked donations",
        request.id,
        linked.len()
    );
    let donation = &linked[0];
    assert_eq!(donation.request_id.as_deref(), Some(request.id.as_str()));
    assert_ne!(donation.status, DonationStatus::Available);
    assert_eq!(
        donation.orphanage_id.as_deref(),
        Some(request.orphanage_id.as_str())
    );
}

pub fn assert_donation_invariants(donation: &Donation) {
    assert_servings_positive(donation);
    if donation.status == DonationStatus::Available {
        assert!(donation.orphanage_id.is_none());
        assert!(donation.request_id.is_none());
    }
}

pub fn assert_request_invariants(request: &Request) {
    assert_quantity_positive(request);
    assert_fulfilment_recorded(request);
}
