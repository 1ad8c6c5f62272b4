//! Delivery fee and time quoting.
//!
//! The computation itself is deterministic and side-effect free, so it is
//! safe to call speculatively while a customer types a postal code. The
//! service wrapper adds the two lookups the pure functions cannot do:
//! merchant configuration and, for radius-based quoting, geocoding.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{merchant, Merchant};
use crate::errors::ServiceError;
use crate::providers::{Geocoder, LatLng};

static POSTAL_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").expect("postal regex"));

/// Travel time assumed per kilometre for distance-based estimates.
const TRAVEL_MINUTES_PER_KM: f64 = 4.0;
/// Travel estimate when the merchant quotes one flat fee island-wide.
const FLAT_RATE_TRAVEL_MINUTES: i32 = 30;

/// A validated Singapore postal code: exactly six digits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostalCode(String);

impl PostalCode {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let trimmed = raw.trim();
        if POSTAL_CODE_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ServiceError::InvalidAddress(format!(
                "postal code must be exactly 6 digits, got {raw:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 2-digit postal district prefix used by zone tables.
    pub fn district(&self) -> &str {
        &self.0[..2]
    }
}

/// One entry of a merchant's zoned fee table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
    /// 2-digit postal district prefixes this zone covers
    pub districts: Vec<String>,
    pub fee: Decimal,
    pub travel_minutes: i32,
}

/// The delivery-relevant slice of a merchant's configuration.
#[derive(Clone, Debug)]
pub struct DeliveryProfile {
    pub delivery_enabled: bool,
    pub base_fee: Decimal,
    pub free_delivery_above: Option<Decimal>,
    pub zones: Vec<DeliveryZone>,
    pub max_distance_km: Option<f64>,
    pub per_km_fee: Option<Decimal>,
    pub preparation_minutes: i32,
    pub origin_postal: String,
}

impl DeliveryProfile {
    pub fn from_merchant(merchant: &merchant::Model) -> Self {
        let zones = merchant
            .delivery_zones
            .as_ref()
            .map(|json| match serde_json::from_value::<Vec<DeliveryZone>>(json.clone()) {
                Ok(zones) => zones,
                Err(err) => {
                    warn!(merchant_id = %merchant.id, %err, "malformed delivery zone table; ignoring");
                    Vec::new()
                }
            })
            .unwrap_or_default();

        Self {
            delivery_enabled: merchant.delivery_enabled,
            base_fee: merchant.delivery_fee,
            free_delivery_above: merchant.free_delivery_above,
            zones,
            max_distance_km: merchant.max_delivery_distance_km,
            per_km_fee: merchant.per_km_fee,
            preparation_minutes: merchant.preparation_minutes,
            origin_postal: merchant.postal_code.clone(),
        }
    }
}

/// Typed quoting result. "Cannot compute a fee" is data, not an error:
/// callers decide whether that blocks checkout or just renders a message.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryQuote {
    Quote {
        fee: Decimal,
        estimated_minutes: i32,
    },
    NotDeliverable {
        reason: String,
    },
}

fn apply_free_threshold(
    profile: &DeliveryProfile,
    fee: Decimal,
    subtotal: Option<Decimal>,
) -> Decimal {
    match (profile.free_delivery_above, subtotal) {
        (Some(threshold), Some(subtotal)) if subtotal >= threshold => Decimal::ZERO,
        _ => fee.round_dp(2),
    }
}

/// Zone-table lookup. `None` means the table has no entry for the
/// destination district and the caller should fall through to
/// distance-based quoting.
pub fn quote_from_zones(
    profile: &DeliveryProfile,
    postal: &PostalCode,
    subtotal: Option<Decimal>,
) -> Option<DeliveryQuote> {
    let district = postal.district();
    let zone = profile
        .zones
        .iter()
        .find(|z| z.districts.iter().any(|d| d == district))?;

    Some(DeliveryQuote::Quote {
        fee: apply_free_threshold(profile, zone.fee, subtotal),
        estimated_minutes: profile.preparation_minutes + zone.travel_minutes,
    })
}

/// Distance-based quoting once a geocoded distance is known.
pub fn quote_from_distance(
    profile: &DeliveryProfile,
    distance_km: f64,
    subtotal: Option<Decimal>,
) -> DeliveryQuote {
    let Some(max_km) = profile.max_distance_km else {
        return DeliveryQuote::NotDeliverable {
            reason: "merchant has no delivery radius configured".to_string(),
        };
    };

    if distance_km > max_km {
        return DeliveryQuote::NotDeliverable {
            reason: format!("destination is {distance_km:.1} km away, beyond the {max_km:.1} km delivery radius"),
        };
    }

    let surcharge = profile
        .per_km_fee
        .map(|per_km| per_km * Decimal::from_f64(distance_km).unwrap_or(Decimal::ZERO))
        .unwrap_or(Decimal::ZERO);
    let fee = apply_free_threshold(profile, profile.base_fee + surcharge, subtotal);

    let travel = (distance_km * TRAVEL_MINUTES_PER_KM).ceil() as i32;
    DeliveryQuote::Quote {
        fee,
        estimated_minutes: profile.preparation_minutes + travel,
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[derive(Clone)]
pub struct DeliveryService {
    db: Arc<DatabaseConnection>,
    geocoder: Arc<dyn Geocoder>,
}

impl DeliveryService {
    pub fn new(db: Arc<DatabaseConnection>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { db, geocoder }
    }

    /// Quote delivery for a merchant and destination postal code.
    /// Validates the postal code before touching the store.
    #[instrument(skip(self))]
    pub async fn quote(
        &self,
        merchant_id: Uuid,
        postal_code: &str,
        subtotal: Option<Decimal>,
    ) -> Result<DeliveryQuote, ServiceError> {
        let postal = PostalCode::parse(postal_code)?;

        let merchant = Merchant::find_active_by_id(merchant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidMerchant(format!("merchant {merchant_id} not found"))
            })?;

        let profile = DeliveryProfile::from_merchant(&merchant);
        self.quote_for_profile(&profile, &postal, subtotal).await
    }

    /// Quote against an already-loaded profile (used by order placement to
    /// avoid re-reading the merchant inside its transaction).
    pub async fn quote_for_profile(
        &self,
        profile: &DeliveryProfile,
        postal: &PostalCode,
        subtotal: Option<Decimal>,
    ) -> Result<DeliveryQuote, ServiceError> {
        if !profile.delivery_enabled {
            return Ok(DeliveryQuote::NotDeliverable {
                reason: "merchant does not offer delivery".to_string(),
            });
        }

        if let Some(quote) = quote_from_zones(profile, postal, subtotal) {
            return Ok(quote);
        }

        // No zone entry. A configured radius lets us fall back to geocoded
        // distance; a flat-fee merchant (no zones at all) delivers anywhere.
        if profile.max_distance_km.is_some() {
            let destination = self.geocoder.locate(postal.as_str()).await?;
            let origin = self.geocoder.locate(&profile.origin_postal).await?;
            return Ok(match (origin, destination) {
                (Some(from), Some(to)) => {
                    quote_from_distance(profile, haversine_km(from, to), subtotal)
                }
                _ => DeliveryQuote::NotDeliverable {
                    reason: format!("postal code {} is not recognised", postal.as_str()),
                },
            });
        }

        if profile.zones.is_empty() {
            return Ok(DeliveryQuote::Quote {
                fee: apply_free_threshold(profile, profile.base_fee, subtotal),
                estimated_minutes: profile.preparation_minutes + FLAT_RATE_TRAVEL_MINUTES,
            });
        }

        Ok(DeliveryQuote::NotDeliverable {
            reason: format!(
                "district {} is outside the merchant's delivery zones",
                postal.district()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn flat_profile() -> DeliveryProfile {
        DeliveryProfile {
            delivery_enabled: true,
            base_fee: dec!(5.00),
            free_delivery_above: None,
            zones: Vec::new(),
            max_distance_km: None,
            per_km_fee: None,
            preparation_minutes: 30,
            origin_postal: "310100".to_string(),
        }
    }

    fn zoned_profile() -> DeliveryProfile {
        DeliveryProfile {
            zones: vec![
                DeliveryZone {
                    districts: vec!["52".to_string(), "53".to_string()],
                    fee: dec!(4.00),
                    travel_minutes: 20,
                },
                DeliveryZone {
                    districts: vec!["31".to_string()],
                    fee: dec!(2.50),
                    travel_minutes: 10,
                },
            ],
            ..flat_profile()
        }
    }

    #[test]
    fn postal_code_requires_exactly_six_digits() {
        assert!(PostalCode::parse("520123").is_ok());
        assert!(PostalCode::parse(" 520123 ").is_ok());
        assert_matches!(
            PostalCode::parse("52012"),
            Err(ServiceError::InvalidAddress(_))
        );
        assert_matches!(
            PostalCode::parse("5201234"),
            Err(ServiceError::InvalidAddress(_))
        );
        assert_matches!(
            PostalCode::parse("52O123"),
            Err(ServiceError::InvalidAddress(_))
        );
        assert_matches!(PostalCode::parse(""), Err(ServiceError::InvalidAddress(_)));
    }

    #[test]
    fn district_is_first_two_digits() {
        assert_eq!(PostalCode::parse("520123").unwrap().district(), "52");
    }

    #[test]
    fn zone_match_returns_zone_fee() {
        let postal = PostalCode::parse("520123").unwrap();
        let quote = quote_from_zones(&zoned_profile(), &postal, None).unwrap();
        assert_eq!(
            quote,
            DeliveryQuote::Quote {
                fee: dec!(4.00),
                estimated_minutes: 50,
            }
        );
    }

    #[test]
    fn unmatched_district_returns_none_not_default() {
        let postal = PostalCode::parse("640123").unwrap();
        assert!(quote_from_zones(&zoned_profile(), &postal, None).is_none());
    }

    #[test]
    fn free_delivery_threshold_zeroes_fee() {
        let profile = DeliveryProfile {
            free_delivery_above: Some(dec!(50.00)),
            ..zoned_profile()
        };
        let postal = PostalCode::parse("310005").unwrap();

        let below = quote_from_zones(&profile, &postal, Some(dec!(49.99))).unwrap();
        assert_matches!(below, DeliveryQuote::Quote { fee, .. } if fee == dec!(2.50));

        let above = quote_from_zones(&profile, &postal, Some(dec!(50.00))).unwrap();
        assert_matches!(above, DeliveryQuote::Quote { fee, .. } if fee == Decimal::ZERO);
    }

    #[test]
    fn distance_quote_within_radius() {
        let profile = DeliveryProfile {
            max_distance_km: Some(8.0),
            per_km_fee: Some(dec!(0.50)),
            ..flat_profile()
        };

        let quote = quote_from_distance(&profile, 4.0, None);
        assert_eq!(
            quote,
            DeliveryQuote::Quote {
                fee: dec!(7.00), // 5.00 base + 4km * 0.50
                estimated_minutes: 46,
            }
        );
    }

    #[test]
    fn distance_quote_beyond_radius_is_not_deliverable() {
        let profile = DeliveryProfile {
            max_distance_km: Some(5.0),
            ..flat_profile()
        };
        assert_matches!(
            quote_from_distance(&profile, 9.3, None),
            DeliveryQuote::NotDeliverable { .. }
        );
    }

    #[test]
    fn haversine_known_distance() {
        // Toa Payoh to Tampines is roughly 10 km
        let toa_payoh = LatLng {
            latitude: 1.3343,
            longitude: 103.8563,
        };
        let tampines = LatLng {
            latitude: 1.3496,
            longitude: 103.9568,
        };
        let km = haversine_km(toa_payoh, tampines);
        assert!((10.0..13.0).contains(&km), "got {km}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = LatLng {
            latitude: 1.3,
            longitude: 103.8,
        };
        assert!(haversine_km(p, p) < 1e-9);
    }
}
