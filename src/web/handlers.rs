use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{Json, WithStatus};
use warp::Filter;

use crate::error::{Error, Result};
use crate::manager::AbstractManager;
use crate::web::schemas::{AddressUpdate, ConfigUpdate, Failure, Health, NewReservation};

type Manager = Arc<dyn AbstractManager>;
type Reply = std::result::Result<WithStatus<Json>, Infallible>;

/// All routes under `/api/dhcp`.
pub fn filters(
    manager: Manager,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let status = warp::path!("api" / "dhcp" / "status")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(status_handler);
    let health = warp::path!("api" / "dhcp" / "health")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(health_handler);
    let leases = warp::path!("api" / "dhcp" / "leases")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(leases_handler);
    let statistics = warp::path!("api" / "dhcp" / "statistics")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(statistics_handler);
    let list = warp::path!("api" / "dhcp" / "reservations")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(list_reservations_handler);
    let add = warp::path!("api" / "dhcp" / "reservations")
        .and(warp::post())
        .and(with_manager(manager.clone()))
        .and(warp::body::bytes())
        .and_then(add_reservation_handler);
    let update = warp::path!("api" / "dhcp" / "reservations" / String)
        .and(warp::put())
        .and(with_manager(manager.clone()))
        .and(warp::body::bytes())
        .and_then(update_reservation_handler);
    let remove = warp::path!("api" / "dhcp" / "reservations" / String)
        .and(warp::delete())
        .and(with_manager(manager.clone()))
        .and_then(remove_reservation_handler);
    let get_config = warp::path!("api" / "dhcp" / "config")
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(get_config_handler);
    let put_config = warp::path!("api" / "dhcp" / "config")
        .and(warp::post())
        .and(with_manager(manager))
        .and(warp::body::bytes())
        .and_then(update_config_handler);

    status
        .or(health)
        .or(leases)
        .or(statistics)
        .or(list)
        .or(add)
        .or(update)
        .or(remove)
        .or(get_config)
        .or(put_config)
}

fn with_manager(
    manager: Manager,
) -> impl Filter<Extract = (Manager,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn failure(err: &Error) -> WithStatus<Json> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    reply(status, &Failure::new(err.to_string()))
}

fn bad_request(message: &str) -> WithStatus<Json> {
    reply(StatusCode::BAD_REQUEST, &Failure::new(message))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Option<T> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body).ok()
}

/// Manager calls touch files and spawn commands, keep them off the reactor.
async fn blocking<T, F>(manager: Manager, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn AbstractManager) -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(manager.as_ref())).await {
        Ok(res) => res,
        Err(err) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            err,
        ))),
    }
}

pub async fn status_handler(manager: Manager) -> Reply {
    let status = blocking(manager, |m| Ok(m.service_status())).await;
    Ok(match status {
        Ok(status) => reply(StatusCode::OK, &json!({ "success": true, "status": status })),
        Err(err) => failure(&err),
    })
}

pub async fn health_handler(manager: Manager) -> Reply {
    let health = blocking(manager, |m| {
        let service = m.service_status();
        let config_valid = m.validate_config();
        Ok(Health {
            status: if service.active && config_valid {
                "healthy"
            } else {
                "unhealthy"
            },
            service,
            config_valid,
        })
    })
    .await;
    Ok(match health {
        Ok(health) => reply(StatusCode::OK, &health),
        Err(err) => failure(&err),
    })
}

pub async fn leases_handler(manager: Manager) -> Reply {
    Ok(match blocking(manager, |m| m.leases()).await {
        Ok(leases) => reply(StatusCode::OK, &json!({ "success": true, "leases": leases })),
        Err(err) => failure(&err),
    })
}

pub async fn statistics_handler(manager: Manager) -> Reply {
    Ok(match blocking(manager, |m| m.statistics()).await {
        Ok(stats) => reply(
            StatusCode::OK,
            &json!({ "success": true, "statistics": stats }),
        ),
        Err(err) => failure(&err),
    })
}

pub async fn list_reservations_handler(manager: Manager) -> Reply {
    Ok(match blocking(manager, |m| m.reservations()).await {
        Ok(reservations) => reply(
            StatusCode::OK,
            &json!({ "success": true, "reservations": reservations }),
        ),
        Err(err) => failure(&err),
    })
}

pub async fn add_reservation_handler(manager: Manager, body: Bytes) -> Reply {
    let req: NewReservation = match parse_body(&body) {
        Some(req) => req,
        None => return Ok(bad_request("No data provided")),
    };
    let hw_address = match req.hw_address {
        Some(hw) => hw,
        None => return Ok(bad_request("Missing required field: hw-address")),
    };
    let added = blocking(manager, move |m| {
        m.add_reservation(
            &hw_address,
            req.ip_address.as_deref(),
            req.hostname.as_deref(),
        )
    })
    .await;
    Ok(match added {
        Ok(reservation) => reply(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "Reservation added successfully",
                "reservation": reservation,
            }),
        ),
        Err(err) => failure(&err),
    })
}

pub async fn update_reservation_handler(id: String, manager: Manager, body: Bytes) -> Reply {
    let req: AddressUpdate = match parse_body(&body) {
        Some(req) => req,
        None => return Ok(bad_request("No data provided")),
    };
    let ip_address = match req.ip_address {
        Some(ip) => ip,
        None => return Ok(bad_request("Missing required field: ip-address")),
    };
    let updated = blocking(manager, move |m| m.update_reservation(&id, &ip_address)).await;
    Ok(match updated {
        Ok(reservation) => reply(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "Reservation updated successfully",
                "reservation": reservation,
            }),
        ),
        Err(err) => failure(&err),
    })
}

pub async fn remove_reservation_handler(id: String, manager: Manager) -> Reply {
    Ok(match blocking(manager, move |m| m.remove_reservation(&id)).await {
        Ok(true) => reply(
            StatusCode::OK,
            &json!({ "success": true, "message": "Reservation removed successfully" }),
        ),
        Ok(false) => reply(StatusCode::NOT_FOUND, &Failure::new("Reservation not found")),
        Err(err) => failure(&err),
    })
}

pub async fn get_config_handler(manager: Manager) -> Reply {
    Ok(match blocking(manager, |m| m.config()).await {
        Ok(config) => reply(StatusCode::OK, &json!({ "success": true, "config": config })),
        Err(err) => failure(&err),
    })
}

pub async fn update_config_handler(manager: Manager, body: Bytes) -> Reply {
    let config = match parse_body::<ConfigUpdate>(&body).and_then(|req| req.config) {
        Some(config) => config,
        None => return Ok(bad_request("No configuration provided")),
    };
    Ok(match blocking(manager, move |m| m.replace_config(config)).await {
        Ok(config) => reply(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "Configuration updated successfully",
                "config": config,
            }),
        ),
        Err(err) => failure(&err),
    })
}
