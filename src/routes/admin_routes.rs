use axum::{Router, routing::{get, post}};
use crate::{AppState, controllers::admin_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/admin/dashboard", get(admin_controller::get_dashboard))
        .route("/api/admin/users", get(admin_controller::get_users))
        .route("/api/admin/users/:id", get(admin_controller::get_user).patch(admin_controller::patch_user))
        .route("/api/admin/users/:id/adjust", post(admin_controller::post_adjust))
        .route("/api/admin/withdrawals", get(admin_controller::get_withdrawals))
        .route("/api/admin/withdrawals/:id/approve", post(admin_controller::post_approve_withdrawal))
        .route("/api/admin/withdrawals/:id/reject", post(admin_controller::post_reject_withdrawal))
        .route("/api/admin/deposits", get(admin_controller::get_deposits))
        .route("/api/admin/orders", get(admin_controller::get_orders))
        .route("/api/admin/audit-logs", get(admin_controller::get_audit_logs))
        .route("/api/admin/broadcast", post(admin_controller::post_broadcast))
        .route("/api/admin/ws/stats", get(admin_controller::get_ws_stats))
}
