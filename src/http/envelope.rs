use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use serde::Serialize;

use crate::booking::FieldErrors;

/// The one response shape every route speaks.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        data: Some(data),
        message: None,
        errors: None,
    })
}

pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        data: Some(data),
        message: Some(message.into()),
        errors: None,
    })
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope {
        success: true,
        data: Some(data),
        message: Some("Resource created successfully".to_string()),
        errors: None,
    })
}

pub fn no_content() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

pub fn failure(status: StatusCode, message: &str, errors: Option<FieldErrors>) -> HttpResponse {
    HttpResponse::build(status).json(Envelope::<()> {
        success: false,
        data: None,
        message: Some(message.to_string()),
        errors,
    })
}
