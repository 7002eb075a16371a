mod error;
mod state;
mod upload;

pub use error::ErrorBody;
pub use state::HttpState;
pub use upload::{is_csv_name, read_csv_upload, UPLOAD_FIELD};

use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{
    delete, dev::Server, get, post, route, web, App, HttpResponse, HttpServer, Responder,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::{IngestError, SearchResult};
use crate::infrastructure::config::ServerSettings;

type HandlerResult = std::result::Result<HttpResponse, IngestError>;

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub table: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub table: String,
    pub field: String,
    pub value: String,
}

#[route("/", method = "GET", method = "HEAD")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "backend running" }))
}

#[post("/upload-csv")]
async fn upload_csv(data: web::Data<HttpState>, payload: Multipart) -> HandlerResult {
    let upload = read_csv_upload(payload, data.max_upload_bytes).await?;
    let outcome = data.ingest.execute(upload).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[get("/datasets")]
async fn list_datasets(data: web::Data<HttpState>) -> HandlerResult {
    let entries = data.retriever.list().await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[post("/datasets/delete")]
async fn delete_dataset(
    data: web::Data<HttpState>,
    req: web::Json<DeleteRequest>,
) -> HandlerResult {
    data.retriever.delete(&req.table).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted" })))
}

#[delete("/datasets/{table}")]
async fn delete_dataset_by_path(
    data: web::Data<HttpState>,
    table: web::Path<String>,
) -> HandlerResult {
    data.retriever.delete(&table).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted" })))
}

#[get("/download/{table}")]
async fn download(data: web::Data<HttpState>, table: web::Path<String>) -> HandlerResult {
    let export = data.retriever.export(&table).await?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export.file_name)],
        })
        .streaming(export.body))
}

#[get("/search")]
async fn search(data: web::Data<HttpState>, query: web::Query<SearchQuery>) -> HandlerResult {
    let result = data
        .retriever
        .search(&query.table, &query.field, &query.value)
        .await?;

    if result.is_empty() {
        return Ok(HttpResponse::Ok().json(json!({ "message": "Code not found", "rows": [] })));
    }
    Ok(HttpResponse::Ok().json(json!({ "rows": rows_as_objects(&result) })))
}

fn rows_as_objects(result: &SearchResult) -> Vec<Value> {
    result
        .records
        .iter()
        .map(|record| {
            let mut object = Map::new();
            object.insert("id".to_string(), Value::from(record.id));
            for (column, value) in result.columns.iter().zip(&record.values) {
                object.insert(column.to_string(), Value::from(value.as_str()));
            }
            Value::Object(object)
        })
        .collect()
}

/// Register every route. Callers provide `web::Data<HttpState>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(upload_csv)
        .service(list_datasets)
        .service(delete_dataset)
        .service(delete_dataset_by_path)
        .service(download)
        .service(search);
}

pub fn start_server(
    state: web::Data<HttpState>,
    settings: &ServerSettings,
) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((settings.host.as_str(), settings.port))?
    .run();

    info!(host = %settings.host, port = settings.port, "HTTP server listening");
    Ok(server)
}
