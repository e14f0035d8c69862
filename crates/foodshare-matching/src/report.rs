use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use foodshare_core::{Listing, RankedMatch};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

/// One ranking pass, as written to `reports/<run_id>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub delegate: String,
    pub request: Listing,
    pub pool_size: usize,
    pub results: Vec<RankedMatch>,
}

impl MatchRun {
    pub fn direct_matches(&self) -> usize {
        self.results.iter().filter(|r| r.as_match().is_some()).count()
    }

    pub fn trade_loops(&self) -> usize {
        self.results.iter().filter(|r| r.as_trade_loop().is_some()).count()
    }
}

/// Writes `ranked_matches.json` and `match_brief.md` under
/// `<root>/reports/<run_id>/` and returns that directory.
pub async fn write_match_report(root: &Path, run: &MatchRun) -> Result<PathBuf> {
    let reports_dir = root.join("reports").join(run.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(run).context("serializing ranked matches")?;
    fs::write(reports_dir.join("ranked_matches.json"), json)
        .await
        .context("writing ranked_matches.json")?;

    fs::write(reports_dir.join("match_brief.md"), render_brief(run))
        .await
        .context("writing match_brief.md")?;

    Ok(reports_dir)
}

pub fn render_brief(run: &MatchRun) -> String {
    let mut out = format!(
        "# Match Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Delegate: {}\n- Request: `{}` ({})\n- Pool size: {}\n- Direct matches: {}\n- Trade loops: {}\n",
        run.run_id,
        run.started_at,
        run.finished_at,
        run.delegate,
        run.request.id,
        run.request.category,
        run.pool_size,
        run.direct_matches(),
        run.trade_loops(),
    );

    out.push_str("\n## Ranked Offers\n");
    let mut rank = 0;
    for matched in run.results.iter().filter_map(RankedMatch::as_match) {
        rank += 1;
        let _ = writeln!(
            out,
            "{rank}. `{}` total {:.2} ({}) - {}; {}; {}",
            matched.offer.id,
            matched.scores.total,
            matched.kind.label(),
            matched.insights.location,
            matched.insights.urgency,
            matched.insights.value,
        );
    }
    if rank == 0 {
        out.push_str("- none\n");
    }

    let loops: Vec<_> = run.results.iter().filter_map(RankedMatch::as_trade_loop).collect();
    if !loops.is_empty() {
        out.push_str("\n## Trade Loops\n");
        for trade_loop in loops {
            let chain = trade_loop
                .links
                .iter()
                .map(|l| format!("`{}`", l.offer_id))
                .collect::<Vec<_>>()
                .join(" -> ");
            let _ = writeln!(out, "- {chain} -> `{}`", run.request.id);
        }
    }
    out
}
