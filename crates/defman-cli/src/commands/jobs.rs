//! Job status and cancellation against a running server

use colored::Colorize;
use defman_core::{DeploymentJob, ErrorKind, JobId, JobStatus};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::context::runtime;
use crate::error::{CliError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_kind: ErrorKind,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody {
    cancelled: bool,
}

fn base_url(server: &str) -> Result<&str> {
    if !(server.starts_with("http://") || server.starts_with("https://")) {
        return Err(CliError::user(format!(
            "Server URL must start with http:// or https://: {server}"
        )));
    }
    Ok(server.trim_end_matches('/'))
}

/// Run the status command
pub fn run_status(server: &str, job_id: Option<&str>, json: bool) -> Result<()> {
    let job_id = job_id.map(str::parse::<JobId>).transpose()?;
    let base = base_url(server)?;

    let rt = runtime()?;
    match job_id {
        Some(id) => {
            let job: DeploymentJob =
                rt.block_on(request(reqwest::Method::GET, &format!("{base}/jobs/{id}")))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job);
            }
        }
        None => {
            let jobs: Vec<DeploymentJob> =
                rt.block_on(request(reqwest::Method::GET, &format!("{base}/jobs")))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("{}", "No jobs".dimmed());
            } else {
                for job in &jobs {
                    print_job_line(job);
                }
            }
        }
    }
    Ok(())
}

/// Run the cancel command
pub fn run_cancel(server: &str, job_id: &str) -> Result<()> {
    let id: JobId = job_id.parse()?;
    let base = base_url(server)?;

    let body: CancelBody =
        runtime()?.block_on(request(reqwest::Method::DELETE, &format!("{base}/jobs/{id}")))?;
    if body.cancelled {
        println!(
            "{} Cancellation requested for {}",
            "OK".green().bold(),
            id.to_string().cyan()
        );
    } else {
        println!("{} Job {} already finished", "OK".green().bold(), id.to_string().cyan());
    }
    Ok(())
}

async fn request<T: DeserializeOwned>(method: reqwest::Method, url: &str) -> Result<T> {
    tracing::debug!(%method, url, "Calling server");
    let response = reqwest::Client::new().request(method, url).send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let code = status.as_u16();
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(CliError::Server {
            status: code,
            error_kind: body.error_kind,
            message: body.message,
        }),
        Err(_) => Err(CliError::Server {
            status: code,
            error_kind: ErrorKind::Transport,
            message: status.to_string(),
        }),
    }
}

fn colored_status(status: JobStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Completed => text.green(),
        JobStatus::Failed | JobStatus::TimedOut => text.red(),
        JobStatus::Cancelled => text.yellow(),
        JobStatus::Pending | JobStatus::Running => text.blue(),
    }
}

fn print_job_line(job: &DeploymentJob) {
    println!(
        "  {} {:<10} {} {}",
        job.job_id.to_string().cyan(),
        job.kind.as_str(),
        colored_status(job.status),
        job.target.dimmed()
    );
}

fn print_job(job: &DeploymentJob) {
    println!("{}", "Job Status".bold());
    println!();
    println!("{}:      {}", "Id".dimmed(), job.job_id.to_string().cyan());
    println!("{}:    {}", "Kind".dimmed(), job.kind);
    println!("{}:  {}", "Status".dimmed(), colored_status(job.status));
    println!("{}:  {}", "Target".dimmed(), job.target);
    if !job.target_ids.is_empty() {
        println!("{}:     {}", "Ids".dimmed(), job.target_ids.join(", "));
    }
    let started = job
        .started_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    println!("{}: {}", "Started".dimmed(), started);
    if let Some(done) = job.completed_at {
        println!("{}:    {}", "Done".dimmed(), done.to_rfc3339());
    }
    if let Some(summary) = &job.summary {
        println!("{}: {}", "Summary".dimmed(), summary);
    }
    if let Some(error) = &job.last_error {
        println!("{}:   {}", "Error".dimmed(), error.red());
    }
}
