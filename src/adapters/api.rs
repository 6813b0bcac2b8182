use actix_web::{HttpResponse, Responder, get, post, web};

use crate::app::runtime::ServiceHandle;

#[derive(Clone)]
pub struct ApiState {
    pub service: ServiceHandle,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(status_endpoint)
        .service(apply_config_endpoint)
        .service(stop_endpoint)
        .service(restart_endpoint)
        .service(end_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/status")]
async fn status_endpoint(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.service.status())
}

/// Hands the raw JSON document to the upload task and waits for its verdict.
#[post("/config")]
async fn apply_config_endpoint(state: web::Data<ApiState>, body: String) -> impl Responder {
    let service = state.service.clone();
    match web::block(move || service.apply_config(&body)).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "applied": true })),
        Ok(false) => HttpResponse::BadRequest().json(serde_json::json!({ "applied": false })),
        Err(error) => {
            tracing::error!(error = %error, "configuration hand-off failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal server error"
            }))
        }
    }
}

#[post("/stop")]
async fn stop_endpoint(state: web::Data<ApiState>) -> impl Responder {
    state.service.stop();
    accepted()
}

#[post("/restart")]
async fn restart_endpoint(state: web::Data<ApiState>) -> impl Responder {
    state.service.restart();
    accepted()
}

#[post("/end")]
async fn end_endpoint(state: web::Data<ApiState>) -> impl Responder {
    state.service.end();
    accepted()
}

fn accepted() -> HttpResponse {
    HttpResponse::Accepted().json(serde_json::json!({ "accepted": true }))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;
    use std::thread::JoinHandle;

    use actix_web::{App, body::to_bytes, http::StatusCode, test, web};

    use crate::app::runtime::{UploadCommand, service_channel};
    use crate::domain::models::UploaderStatus;

    use super::{ApiState, configure_routes};

    /// Answers configuration commands on a background thread and reports the
    /// first `expected` commands it saw.
    fn spawn_responder(
        commands: Receiver<UploadCommand>,
        expected: usize,
    ) -> JoinHandle<Vec<&'static str>> {
        std::thread::spawn(move || {
            let mut seen = Vec::new();
            for command in commands.iter().take(expected) {
                match command {
                    UploadCommand::ApplyConfig { json, reply } => {
                        let _ = reply.send(json.contains("\"pvoutput\""));
                        seen.push("config");
                    }
                    UploadCommand::Stop => seen.push("stop"),
                    UploadCommand::Restart => seen.push("restart"),
                    UploadCommand::End => seen.push("end"),
                }
            }
            seen
        })
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let (service, _commands, _status) = service_channel();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ApiState { service }))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn status_endpoint_reports_published_snapshot() {
        let (service, _commands, status) = service_channel();
        *status.lock().expect("status lock") = UploaderStatus {
            running: true,
            last_posted_local_time: 1_709_632_800,
            last_posted_utc: 1_709_614_800,
        };
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ApiState { service }))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body()).await.expect("body should read");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(
            json,
            serde_json::json!({
                "running": true,
                "lastPostedLocalTime": 1_709_632_800,
                "lastpost": 1_709_614_800
            })
        );
    }

    #[actix_web::test]
    async fn config_endpoint_reports_whether_document_was_applied() {
        let (service, commands, _status) = service_channel();
        let responder = spawn_responder(commands, 2);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ApiState { service }))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/config")
            .set_payload(r#"{"type":"pvoutput","revision":3}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/config")
            .set_payload(r#"{"type":"influx","revision":3}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(resp.into_body()).await.expect("body should read");
        assert_eq!(body.as_ref(), br#"{"applied":false}"#);

        assert_eq!(
            responder.join().expect("responder thread"),
            vec!["config", "config"]
        );
    }

    #[actix_web::test]
    async fn lifecycle_endpoints_forward_commands() {
        let (service, commands, _status) = service_channel();
        let responder = spawn_responder(commands, 3);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ApiState { service }))
                .configure(configure_routes),
        )
        .await;

        for uri in ["/stop", "/restart", "/end"] {
            let req = test::TestRequest::post().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        assert_eq!(
            responder.join().expect("responder thread"),
            vec!["stop", "restart", "end"]
        );
    }
}
