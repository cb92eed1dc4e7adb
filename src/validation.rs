// src/validation.rs

use crate::errors::{FieldError, PricingError};
use crate::metrics;
use crate::route_store::RouteConfigStore;
use crate::types::{PricingRequest, RouteConfiguration};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Request validation layer. Field problems are collected and returned
/// together; an unknown route is its own error class and, like every
/// validation failure, never triggers fallback.
pub struct RequestValidator {
    max_group_size: u32,
    supported_currencies: HashSet<String>,
}

impl RequestValidator {
    pub fn new(max_group_size: u32, supported_currencies: impl IntoIterator<Item = String>) -> Self {
        Self {
            max_group_size,
            supported_currencies: supported_currencies.into_iter().collect(),
        }
    }

    /// Validate `request` and resolve its route configuration.
    pub fn validate(
        &self,
        request: &PricingRequest,
        routes: &RouteConfigStore,
        now: DateTime<Utc>,
    ) -> Result<Arc<RouteConfiguration>, PricingError> {
        let mut fields = Vec::new();

        if !self.supported_currencies.contains(&request.currency) {
            fields.push(FieldError::new(
                "currency",
                format!("{} is not supported", request.currency),
            ));
        }
        if request.departure < now {
            fields.push(FieldError::new("departure", "departure is in the past"));
        }
        if request.arrival <= request.departure {
            fields.push(FieldError::new("arrival", "arrival must be after departure"));
        }
        if request.group_size < 1 || request.group_size > self.max_group_size {
            fields.push(FieldError::new(
                "group_size",
                format!("must be between 1 and {}", self.max_group_size),
            ));
        }
        if request.country.len() != 2 || !request.country.bytes().all(|b| b.is_ascii_uppercase()) {
            fields.push(FieldError::new(
                "country",
                "must be an ISO 3166-1 alpha-2 code",
            ));
        }
        if request.booking_class.is_empty()
            || request.booking_class.len() > 2
            || !request
                .booking_class
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            fields.push(FieldError::new(
                "booking_class",
                "must be a one- or two-character fare class code",
            ));
        }

        if !fields.is_empty() {
            for field in &fields {
                metrics::increment_validation_error(field.field);
            }
            return Err(PricingError::Validation(fields));
        }

        routes
            .get(&request.route)
            .ok_or_else(|| PricingError::UnknownRoute(request.route.clone()))
    }
}
