//! rosgw-api - HTTP/WebSocket façade of the router gateway
//!
//! Every JSON endpoint answers with the `{success, message?, data?, error?}`
//! envelope. Live traffic is served over WebSocket at `/ws/traffic/monitor`.
//!
//! # Usage
//!
//! ```ignore
//! use rosgw_api::{create_router, AppState};
//!
//! let state = AppState::new(multiplexer);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod response;
pub mod state;

pub use error::ApiError;
pub use response::ApiResponse;
pub use state::AppState;

use axum::routing::{get, patch};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::{addresses, connections, health, interfaces, monitor, queues, routers, traffic};

/// Create the gateway router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health))
        .route("/ws/health", get(health::ws_health))
        // Inventory
        .route(
            "/api/routers",
            get(routers::list_routers).post(routers::create_router),
        )
        .route("/api/routers/active", get(routers::list_active_routers))
        .route(
            "/api/routers/{id}",
            get(routers::get_router)
                .put(routers::update_router)
                .delete(routers::delete_router),
        )
        .route(
            "/api/routers/{id}/status",
            patch(routers::update_router_status),
        )
        .route("/api/routers/{id}/active", patch(routers::set_router_active))
        // Connections
        .route(
            "/api/connections/status",
            get(connections::connection_status).post(connections::connection_status),
        )
        .route(
            "/api/connections/connect",
            get(connections::connect_router).post(connections::connect_router),
        )
        .route(
            "/api/connections/disconnect",
            get(connections::disconnect_router).post(connections::disconnect_router),
        )
        // One-shot commands
        .route("/api/interfaces", get(interfaces::list_interfaces))
        .route(
            "/api/interfaces/list",
            get(interfaces::list_monitorable_interfaces),
        )
        .route(
            "/api/interfaces/enable",
            get(interfaces::enable_interface).post(interfaces::enable_interface),
        )
        .route(
            "/api/interfaces/disable",
            get(interfaces::disable_interface).post(interfaces::disable_interface),
        )
        .route("/api/addresses", get(addresses::list_addresses))
        .route(
            "/api/addresses/add",
            get(addresses::add_address).post(addresses::add_address),
        )
        .route(
            "/api/addresses/remove",
            get(addresses::remove_address)
                .post(addresses::remove_address)
                .delete(addresses::remove_address),
        )
        .route("/api/queues", get(queues::list_queues))
        .route(
            "/api/queues/add",
            get(queues::add_queue).post(queues::add_queue),
        )
        .route(
            "/api/queues/remove",
            get(queues::remove_queue)
                .post(queues::remove_queue)
                .delete(queues::remove_queue),
        )
        .route("/api/traffic/once", get(traffic::traffic_once))
        // Streaming
        .route("/ws/traffic/monitor", get(monitor::monitor_traffic))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
