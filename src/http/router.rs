//! Route table and middleware.

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;
use crate::observability::HTTP_REQUESTS_TOTAL;

/// Build the application router with every route and middleware attached.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let classes = Router::new()
        .route("/classes", post(handlers::book_class))
        .route("/classes/{id}", get(handlers::get_class))
        .route("/classes/{id}/reschedule", post(handlers::reschedule_class))
        .route("/classes/{id}/cancel", post(handlers::cancel_class))
        .route("/classes/{id}/complete", post(handlers::complete_class))
        .route("/classes/{id}/convert-to-slot", post(handlers::convert_to_slot))
        .route("/classes/{id}/teacher", put(handlers::change_teacher))
        .route("/students/{id}/classes", get(handlers::student_classes))
        .route("/students/{id}/account", get(handlers::student_account));

    let admin = Router::new()
        .route("/admin/students/{id}/credits", post(handlers::adjust_credits))
        .route("/admin/assign-schedule", post(handlers::assign_schedule))
        .route(
            "/admin/teacher-availability/{teacher_id}",
            get(handlers::admin_teacher_availability),
        );

    let availability = Router::new()
        .route("/teachers/{id}/availability", get(handlers::teacher_availability))
        .route("/teachers/{id}/can-book", get(handlers::can_book))
        .route("/teachers/{id}/slots", post(handlers::add_slot))
        .route("/slots/{id}", delete(handlers::remove_slot))
        .route("/slots/{id}/active", put(handlers::set_slot_active));

    let templates = Router::new()
        .route("/class-templates/{student_id}", get(handlers::get_template))
        .route(
            "/class-templates/{student_id}/entries",
            post(handlers::add_template_entry),
        )
        .route(
            "/class-templates/{student_id}/entries/{entry_id}",
            delete(handlers::remove_template_entry),
        )
        .route(
            "/class-templates/{student_id}/generate",
            post(handlers::generate_classes),
        )
        .route(
            "/class-templates/{student_id}/delete-classes",
            post(handlers::delete_classes),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(classes)
        .merge(admin)
        .merge(availability)
        .merge(templates)
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Count every routed request by its route template and status code.
async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let response = next.run(req).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
