use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "KitchenCloud Order API",
        version = "0.3.0",
        description = r#"
Multi-tenant home-kitchen food ordering backend.

Checkout flow: start a session from cart contents, choose delivery or
pickup, then complete it to place an order. Prices are snapshotted at
placement. Payment is an out-of-band PayNow transfer: the customer uploads
a proof screenshot, the merchant verifies and confirms it, and the order
moves through the fulfilment workflow with every transition audited.

Identity is forwarded by the upstream gateway in `x-user-id` /
`x-user-role` headers; this service does not validate credentials.
"#
    ),
    paths(
        crate::handlers::checkout::create_session,
        crate::handlers::checkout::update_delivery,
        crate::handlers::checkout::complete_checkout,
        crate::handlers::checkout::delivery_quote,
        crate::handlers::payments::upload_proof,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::reject_payment,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::update_order_status,
        crate::handlers::merchants::onboard_merchant,
        crate::handlers::merchants::get_storefront,
        crate::handlers::merchants::approve_merchant,
    ),
    tags(
        (name = "Checkout", description = "Checkout sessions and delivery quoting"),
        (name = "Payments", description = "PayNow proof upload and verification"),
        (name = "Orders", description = "Order queries and workflow transitions"),
        (name = "Merchants", description = "Storefronts and onboarding"),
        (name = "Admin", description = "Approval queue and operational sweeps"),
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
