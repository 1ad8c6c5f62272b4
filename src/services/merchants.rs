//! Merchant onboarding, the admin approval workflow, and storefront reads.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    merchant::{self, MerchantStatus},
    product::{self, ProductStatus},
    Merchant, Product,
};
use crate::errors::ServiceError;
use crate::services::delivery::PostalCode;

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct OnboardMerchantInput {
    #[validate(length(min = 2, max = 120))]
    pub business_name: String,
    #[validate(email)]
    pub contact_email: String,
    pub contact_phone: Option<String>,
    #[validate(length(min = 1))]
    pub address_line1: String,
    pub postal_code: String,
    #[serde(default)]
    pub delivery_enabled: bool,
    #[serde(default = "default_true")]
    pub pickup_enabled: bool,
    pub delivery_fee: Option<Decimal>,
    pub minimum_order: Option<Decimal>,
    pub preparation_minutes: Option<i32>,
}

fn default_true() -> bool {
    true
}

/// Public view of a merchant for the storefront, stripped of
/// notification preferences and internal fields.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct StorefrontMerchant {
    pub id: Uuid,
    pub business_name: String,
    pub delivery_enabled: bool,
    pub pickup_enabled: bool,
    pub delivery_fee: Decimal,
    pub free_delivery_above: Option<Decimal>,
    pub minimum_order: Decimal,
    pub preparation_minutes: i32,
    pub postal_code: String,
}

impl From<&merchant::Model> for StorefrontMerchant {
    fn from(m: &merchant::Model) -> Self {
        Self {
            id: m.id,
            business_name: m.business_name.clone(),
            delivery_enabled: m.delivery_enabled,
            pickup_enabled: m.pickup_enabled,
            delivery_fee: m.delivery_fee,
            free_delivery_above: m.free_delivery_above,
            minimum_order: m.minimum_order,
            preparation_minutes: m.preparation_minutes,
            postal_code: m.postal_code.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Storefront {
    pub merchant: StorefrontMerchant,
    pub products: Vec<product::Model>,
}

#[derive(Clone)]
pub struct MerchantService {
    db: Arc<DatabaseConnection>,
}

impl MerchantService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Register a merchant. New merchants start in the admin approval
    /// queue and cannot accept orders until approved.
    #[instrument(skip(self, input), fields(business_name = %input.business_name))]
    pub async fn onboard(
        &self,
        input: OnboardMerchantInput,
    ) -> Result<merchant::Model, ServiceError> {
        input.validate()?;
        PostalCode::parse(&input.postal_code)?;

        let now = Utc::now();
        let model = merchant::ActiveModel {
            id: Set(Uuid::new_v4()),
            business_name: Set(input.business_name),
            status: Set(MerchantStatus::PendingApproval),
            delivery_enabled: Set(input.delivery_enabled),
            pickup_enabled: Set(input.pickup_enabled),
            delivery_fee: Set(input.delivery_fee.unwrap_or(Decimal::ZERO)),
            free_delivery_above: Set(None),
            minimum_order: Set(input.minimum_order.unwrap_or(Decimal::ZERO)),
            preparation_minutes: Set(input.preparation_minutes.unwrap_or(30)),
            address_line1: Set(input.address_line1),
            postal_code: Set(input.postal_code),
            delivery_zones: Set(None),
            max_delivery_distance_km: Set(None),
            per_km_fee: Set(None),
            email_notifications: Set(true),
            whatsapp_notifications: Set(false),
            order_notification_email: Set(None),
            order_notification_phone: Set(None),
            contact_email: Set(input.contact_email),
            contact_phone: Set(input.contact_phone),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        info!(merchant_id = %created.id, "merchant onboarded, awaiting approval");
        Ok(created)
    }

    /// Public storefront: active merchant plus its listed products only.
    pub async fn get_storefront(&self, merchant_id: Uuid) -> Result<Storefront, ServiceError> {
        let merchant = Merchant::find_active_by_id(merchant_id)
            .one(&*self.db)
            .await?
            .filter(|m| m.status == MerchantStatus::Active)
            .ok_or_else(|| {
                ServiceError::InvalidMerchant(format!("merchant {merchant_id} not found"))
            })?;

        let products = Product::find_active_for_merchant(merchant_id)
            .filter(product::Column::Status.eq(ProductStatus::Active))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(Storefront {
            merchant: StorefrontMerchant::from(&merchant),
            products,
        })
    }

    /// Admin listing, filterable by lifecycle status. Soft-deleted
    /// merchants stay out even here; deleted-row audits go through
    /// `find_any_by_id`.
    pub async fn list_by_status(
        &self,
        status: Option<MerchantStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<merchant::Model>, u64), ServiceError> {
        let mut query = Merchant::find()
            .filter(merchant::Column::DeletedAt.is_null())
            .order_by_asc(merchant::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(merchant::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let merchants = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((merchants, total))
    }

    /// Approve a pending merchant.
    #[instrument(skip(self))]
    pub async fn approve(&self, merchant_id: Uuid) -> Result<merchant::Model, ServiceError> {
        self.set_status(
            merchant_id,
            MerchantStatus::PendingApproval,
            MerchantStatus::Active,
        )
        .await
    }

    /// Suspend an active merchant; its storefront stops accepting
    /// sessions immediately.
    #[instrument(skip(self))]
    pub async fn suspend(&self, merchant_id: Uuid) -> Result<merchant::Model, ServiceError> {
        self.set_status(merchant_id, MerchantStatus::Active, MerchantStatus::Suspended)
            .await
    }

    /// Lift a suspension.
    #[instrument(skip(self))]
    pub async fn reinstate(&self, merchant_id: Uuid) -> Result<merchant::Model, ServiceError> {
        self.set_status(merchant_id, MerchantStatus::Suspended, MerchantStatus::Active)
            .await
    }

    async fn set_status(
        &self,
        merchant_id: Uuid,
        expected: MerchantStatus,
        next: MerchantStatus,
    ) -> Result<merchant::Model, ServiceError> {
        let merchant = Merchant::find_active_by_id(merchant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("merchant {merchant_id} not found")))?;

        if merchant.status != expected {
            return Err(ServiceError::InvalidTransition(format!(
                "merchant {merchant_id} is {:?}, expected {:?}",
                merchant.status, expected
            )));
        }

        let mut active: merchant::ActiveModel = merchant.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(merchant_id = %merchant_id, status = ?next, "merchant status changed");
        Ok(updated)
    }
}
