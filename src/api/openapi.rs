//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, borrowings, health, payments, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Library Service API",
        version = "1.0.0",
        description = "Book lending with online payments and fines",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Users
        users::register,
        users::obtain_token,
        users::refresh_token,
        users::me,
        users::replace_me,
        users::update_me,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::replace_book,
        books::update_book,
        books::delete_book,
        // Borrowings
        borrowings::list_borrowings,
        borrowings::get_borrowing,
        borrowings::create_borrowing,
        borrowings::return_borrowing,
        // Payments
        payments::list_payments,
        payments::get_payment,
        payments::renew_payment,
        payments::payment_success,
        payments::payment_cancel,
        payments::stripe_webhook,
    ),
    components(
        schemas(
            // Users
            crate::models::user::User,
            crate::models::user::CreateUser,
            crate::models::user::UpdateProfile,
            users::TokenRequest,
            users::TokenResponse,
            users::RefreshRequest,
            users::AccessTokenResponse,
            // Books
            crate::models::book::Book,
            crate::models::book::CoverType,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            books::BookPage,
            // Borrowings
            crate::models::borrowing::BorrowingStatus,
            crate::models::borrowing::BorrowingDetails,
            crate::models::borrowing::BorrowingShort,
            crate::models::borrowing::CreateBorrowing,
            crate::models::borrowing::BorrowingCreated,
            crate::models::borrowing::ReturnResponse,
            // Payments
            crate::models::payment::PaymentStatus,
            crate::models::payment::PaymentType,
            crate::models::payment::PaymentShort,
            crate::models::payment::PaymentDetails,
            crate::models::payment::CallbackResponse,
            crate::models::payment::RenewResponse,
            // Health
            health::HealthResponse,
            health::ReadinessResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "users", description = "Accounts and authentication"),
        (name = "books", description = "Book catalog"),
        (name = "borrowings", description = "Borrowing and returning books"),
        (name = "payments", description = "Rental payments and fines")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
