use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use log::info;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password};
use pgwire::api::query::{PlaceholderExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{DataRowEncoder, FieldFormat, FieldInfo, QueryResponse, Response};
use pgwire::api::{ClientInfo, MakeHandler, StatelessMakeHandler, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::tokio::process_socket;
use tokio::net::TcpListener;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::{exec_query, QueryResult};
use crate::storage::tuple::Value;

/// Clients authenticate with the configured cleartext password; the user
/// name is not checked.
struct DbAuthSource {
    password: String,
}

#[async_trait]
impl AuthSource for DbAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// The simple-query handler: each statement runs synchronously on a
/// blocking thread, which also carries the statement's transaction
/// binding.
pub struct DbHandler {
    db: Arc<Database>,
}

impl DbHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn error_response(e: DbError) -> PgWireError {
    // rollback errors surface as errors, notice errors as notices
    let (severity, code) = if e.is_rollback() {
        ("ERROR", "00001")
    } else {
        ("NOTICE", "00002")
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        severity.to_string(),
        code.to_string(),
        e.to_string(),
    )))
}

/// Selects come back as all-text fields named after the target columns;
/// statements without a result schema report their affected row count as
/// a single int8 `effect rows` field. Nulls are rendered as the literal
/// text `null`.
fn into_response<'a>(result: QueryResult) -> PgWireResult<Response<'a>> {
    match result.target_columns {
        Some(columns) => {
            let fields = Arc::new(
                columns
                    .iter()
                    .map(|c| {
                        FieldInfo::new(c.to_string(), None, None, Type::TEXT, FieldFormat::Text)
                    })
                    .collect::<Vec<_>>(),
            );
            let mut data_rows = Vec::with_capacity(result.rows.len());
            for row in &result.rows {
                let mut encoder = DataRowEncoder::new(Arc::clone(&fields));
                for value in row {
                    let text = match value {
                        Value::Null => "null".to_string(),
                        other => other.to_string(),
                    };
                    encoder.encode_field(&text)?;
                }
                data_rows.push(encoder.finish());
            }
            Ok(Response::Query(QueryResponse::new(
                fields,
                stream::iter(data_rows.into_iter()),
            )))
        }
        None => {
            let fields = Arc::new(vec![FieldInfo::new(
                "effect rows".to_string(),
                None,
                None,
                Type::INT8,
                FieldFormat::Text,
            )]);
            let mut encoder = DataRowEncoder::new(Arc::clone(&fields));
            encoder.encode_field(&(result.rows.len() as i64))?;
            let data_rows = vec![encoder.finish()];
            Ok(Response::Query(QueryResponse::new(
                fields,
                stream::iter(data_rows.into_iter()),
            )))
        }
    }
}

#[async_trait]
impl SimpleQueryHandler for DbHandler {
    async fn do_query<'b, C>(&self, _client: &C, query: &'b str) -> PgWireResult<Vec<Response<'b>>>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        info!("query: {}", query);
        let db = Arc::clone(&self.db);
        let sql = query.to_string();
        let result = tokio::task::spawn_blocking(move || exec_query(&db, &sql))
            .await
            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
        match result {
            Ok(result) => Ok(vec![into_response(result)?]),
            Err(e) => Err(error_response(e)),
        }
    }
}

/// Accept loop: one task per connection, pgwire handles the protocol
/// (SSLRequest refusal, startup, cleartext password, simple queries).
pub async fn serve(db: Arc<Database>) -> DbResult<()> {
    let authenticator = Arc::new(StatelessMakeHandler::new(Arc::new(
        CleartextPasswordAuthStartupHandler::new(
            DbAuthSource {
                password: db.config().password.clone(),
            },
            DefaultServerParameterProvider,
        ),
    )));
    let processor = Arc::new(StatelessMakeHandler::new(Arc::new(DbHandler::new(
        Arc::clone(&db),
    ))));
    let placeholder = Arc::new(StatelessMakeHandler::new(Arc::new(
        PlaceholderExtendedQueryHandler,
    )));

    let addr = db.config().listen_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("connection from {}", peer);
        let authenticator_ref = authenticator.make();
        let processor_ref = processor.make();
        let placeholder_ref = placeholder.make();
        tokio::spawn(async move {
            process_socket(
                socket,
                None,
                authenticator_ref,
                processor_ref,
                placeholder_ref,
            )
            .await
        });
    }
}
