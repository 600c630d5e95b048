//! Purpose: Hold top-level CLI command dispatch for `evedata`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command except `version` and `completion` needs a settings document.
//! Invariants: Rejected documents and failed partitions produce a notice and a non-zero or partial result.

use super::*;
use evedata::api::{InsertOptions, WriteOutcome, kind_from_status};

pub(super) fn dispatch_command(
    command: Command,
    globals: GlobalArgs,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    if !matches!(command, Command::Serve { .. }) {
        init_tracing("warn");
    }
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "evedata", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Resources => {
            let client = connect(&globals)?;
            emit_json(
                json!({
                    "base_url": client.config().base_url,
                    "resources": client.domain().describe(),
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Count { resource, filter } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            if let Some(raw) = filter {
                controller.set_filters(parse_filter(&raw)?);
            }
            let count = controller.nitems()?;
            emit_json(json!({ "resource": resource, "count": count }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Page {
            resource,
            page,
            query,
            table,
        } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            apply_query(controller, &query)?;
            let content = controller.get_page(page)?;
            let payload = if table {
                content.to_table().to_value()
            } else {
                Value::from(
                    content
                        .to_records()
                        .into_iter()
                        .map(Value::Object)
                        .collect::<Vec<_>>(),
                )
            };
            emit_json(
                json!({
                    "resource": resource,
                    "page": page,
                    "items_per_page": controller.items_per_page(),
                    "count": content.len(),
                    "items": payload,
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Dump {
            resource,
            query,
            limit,
        } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            apply_query(controller, &query)?;
            let limit = limit.unwrap_or(u64::MAX);
            let mut emitted = 0u64;
            for record in controller.records() {
                if emitted >= limit {
                    break;
                }
                emit_jsonl(&Value::Object(record?));
                emitted += 1;
            }
            tracing::debug!(resource = resource.as_str(), emitted, "dump finished");
            Ok(RunOutcome::ok())
        }
        Command::Get { resource, id } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            let item = controller.get_item(&id)?.ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("document not found")
                    .with_path(controller.endpoint().item_path(&id))
            })?;
            let mut document = item.to_document();
            document.insert("_etag".to_string(), json!(item.etag()));
            emit_json(Value::Object(document), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Insert {
            resource,
            input,
            dry_run,
            no_validate,
        } => {
            let docs = read_input(&input)?;
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            let options = InsertOptions {
                validate: !no_validate,
                coerce: input.coerce,
                dry_run,
            };
            let outcome = controller.insert_documents(docs, options)?;
            let mut report = outcome.to_value();
            let ids: Vec<Value> = outcome
                .accepted
                .iter()
                .filter_map(|doc| doc.get("_id").cloned())
                .collect();
            if let Some(report) = report.as_object_mut() {
                report.insert("resource".to_string(), json!(resource));
                report.insert("dry_run".to_string(), json!(dry_run));
                report.insert("ids".to_string(), Value::Array(ids));
            }
            emit_json(report, color_mode);
            if outcome.is_complete() {
                return Ok(RunOutcome::ok());
            }
            let mut details = Map::new();
            details.insert("rejected".to_string(), json!(outcome.rejected.len()));
            details.insert("status".to_string(), json!(outcome.status));
            let message = if outcome.accepted.is_empty() {
                format!("{} documents rejected; nothing was stored", outcome.rejected.len())
            } else {
                format!("{} documents rejected", outcome.rejected.len())
            };
            emit_notice(&notice("rejected", "insert", &resource, message, details), color_mode);
            Ok(RunOutcome::with_code(to_exit_code(ErrorKind::Invalid)))
        }
        Command::Validate { resource, input } => {
            let docs = read_input(&input)?;
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            let total = docs.len();
            let batch = controller.validate_documents(docs, input.coerce);
            let rejected: Vec<Value> = batch
                .rejected
                .iter()
                .zip(&batch.errors)
                .map(|(doc, errors)| json!({"document": doc, "errors": errors}))
                .collect();
            emit_json(
                json!({
                    "resource": resource,
                    "total": total,
                    "valid": batch.valid.len(),
                    "rejected": rejected,
                }),
                color_mode,
            );
            let exit_code = if batch.rejected.is_empty() {
                0
            } else {
                to_exit_code(ErrorKind::Invalid)
            };
            Ok(RunOutcome::with_code(exit_code))
        }
        Command::Delete { resource, id } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            let path = controller.endpoint().item_path(&id);
            let Some(item) = controller.get_item(&id)? else {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("document not found")
                    .with_path(path));
            };
            match item.delete()? {
                WriteOutcome::Accepted { .. } => {
                    emit_json(json!({ "resource": resource, "deleted": id }), color_mode);
                    Ok(RunOutcome::ok())
                }
                WriteOutcome::Conflict { status, message } => Err(Error::new(ErrorKind::Conflict)
                    .with_message(message)
                    .with_path(path)
                    .with_status(status)),
                WriteOutcome::Rejected {
                    status, message, ..
                } => Err(Error::new(kind_from_status(status))
                    .with_message(message)
                    .with_path(path)
                    .with_status(status)),
            }
        }
        Command::Partitions {
            resource,
            filter,
            sort,
            records,
        } => {
            let mut client = connect(&globals)?;
            let controller = client.resource(&resource)?;
            if let Some(raw) = filter {
                controller.set_filters(parse_filter(&raw)?);
            }
            if let Some(raw) = sort {
                controller.set_sort(Sort::parse(&raw)?);
            }
            let frame = client.fetch_partitions(&resource)?;
            if records {
                for record in frame.records() {
                    emit_jsonl(&Value::Object(record.clone()));
                }
            } else {
                emit_json(frame.describe(), color_mode);
            }
            let failed: Vec<u64> = frame.failed().map(|partition| partition.page).collect();
            if !failed.is_empty() {
                let mut details = Map::new();
                details.insert("failed_pages".to_string(), json!(failed));
                let message = format!("{} partitions failed and are empty", failed.len());
                emit_notice(
                    &notice("partial", "partitions", &resource, message, details),
                    color_mode,
                );
            }
            Ok(RunOutcome::ok())
        }
        Command::Serve { bind, seed } => {
            init_tracing("info");
            let settings = read_settings(globals.settings.as_deref())?;
            let bind: std::net::SocketAddr = bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:5000.")
            })?;
            let seed = seed.as_deref().map(read_seed).transpose()?;
            let token = resolve_token_value(globals.token, globals.token_file)?;
            let config = serve::ServeConfig {
                bind,
                settings,
                seed,
                token,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
    }
}

fn read_seed(path: &Path) -> Result<Map<String, Value>, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read seed file")
            .with_path(path.display().to_string())
            .with_source(err)
    })?;
    match serde_json::from_str(&raw) {
        Ok(Value::Object(seed)) => Ok(seed),
        Ok(_) => Err(Error::new(ErrorKind::Usage)
            .with_message("seed must map resource URLs to arrays of documents")
            .with_path(path.display().to_string())),
        Err(err) => Err(Error::new(ErrorKind::Usage)
            .with_message("seed file is not valid JSON")
            .with_path(path.display().to_string())
            .with_source(err)),
    }
}
