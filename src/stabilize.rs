//! Page stabilization before extraction: lazy-content scrolling and
//! iframe inlining.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::page::PageDriver;

pub const IFRAME_ATTR: &str = "data-pagesift-iframe";

/// Consecutive rounds with an unchanged scroll height before we stop
const STABLE_ROUNDS: u32 = 2;

const SCROLL_STEP_SCRIPT: &str = r#"/* pagesift:scroll-step */
const root = document.scrollingElement || document.documentElement;
window.scrollTo(0, root.scrollHeight);
return root.scrollHeight;
"#;

const SCROLL_TOP_SCRIPT: &str = r#"/* pagesift:scroll-top */
window.scrollTo(0, 0);
return true;
"#;

const REPLACE_IFRAME_SCRIPT: &str = r#"/* pagesift:iframe-replace */
const frame = document.querySelectorAll('iframe')[arguments[0]];
if (!frame) return false;
const container = document.createElement('div');
container.setAttribute('data-pagesift-iframe', frame.getAttribute('src') || '');
container.innerHTML = arguments[1];
frame.replaceWith(container);
return true;
"#;

/// Scroll to the bottom until the document height stops growing, then back
/// to the top. Returns the number of rounds performed.
pub async fn scroll_until_stable(page: &dyn PageDriver, max_rounds: u32, pause: Duration) -> Result<u32> {
    let mut previous: Option<f64> = None;
    let mut stable = 0;
    let mut rounds = 0;

    while rounds < max_rounds {
        rounds += 1;
        let height = page
            .evaluate(SCROLL_STEP_SCRIPT, vec![])
            .await
            .context("Scroll step failed")?
            .as_f64()
            .unwrap_or(0.0);
        if previous == Some(height) {
            stable += 1;
            if stable >= STABLE_ROUNDS {
                break;
            }
        } else {
            stable = 0;
        }
        previous = Some(height);
        tokio::time::sleep(pause).await;
    }

    page.evaluate(SCROLL_TOP_SCRIPT, vec![])
        .await
        .context("Scroll to top failed")?;
    debug!("Scrolling settled after {} round(s)", rounds);
    Ok(rounds)
}

/// Replace each `<iframe>` with a `<div data-pagesift-iframe>` holding the
/// frame's body. Frames that cannot be read are left in place. Returns the
/// number of frames inlined.
pub async fn inline_frames(page: &dyn PageDriver, frame_timeout: Duration) -> Result<usize> {
    let count = page.frame_count().await.context("Failed to enumerate iframes")?;
    if count == 0 {
        return Ok(0);
    }

    let mut inlined = 0;
    // Back to front so earlier indices survive each replacement
    for index in (0..count).rev() {
        let body = match tokio::time::timeout(frame_timeout, page.frame_body(index)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!("Leaving iframe {} in place: {:#}", index, e);
                continue;
            }
            Err(_) => {
                warn!("Leaving iframe {} in place: load timed out", index);
                continue;
            }
        };
        let replaced = page
            .evaluate(REPLACE_IFRAME_SCRIPT, vec![json!(index), Value::String(body)])
            .await
            .context("Failed to inline iframe")?;
        if replaced.as_bool().unwrap_or(false) {
            inlined += 1;
        }
    }
    info!("Inlined {} of {} iframe(s)", inlined, count);
    Ok(inlined)
}

#[cfg(test)]
#[path = "stabilize_test.rs"]
mod stabilize_test;
