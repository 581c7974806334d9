// Local web server for browser-backed tests

use std::net::SocketAddr;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use tokio::sync::OnceCell;

use super::fixtures;

static TEST_SERVER: OnceCell<TestServerHandle> = OnceCell::const_new();

pub struct TestServerHandle {
    pub addr: SocketAddr,
    pub base_url: String,
}

/// Tabs that swap their panel in on click, the way single-page shops do
const LIVE_TABS: &str = r#"<!DOCTYPE html>
<html>
<head><title>Desk Lamp</title></head>
<body>
    <h1>Desk Lamp</h1>
    <p>An adjustable lamp with a warm LED.</p>
    <div class="tabs"><button id="tab-specs">Specifications</button><button id="tab-reviews">Reviews</button></div>
    <div id="tab-content"><p>Select a tab</p></div>
    <script>
    const panels = {
        'tab-specs': '<div id="specs-panel"><p>Weight 2kg</p></div>',
        'tab-reviews': '<div id="reviews-panel"><p>Great lamp</p></div>'
    };
    for (const id of Object.keys(panels)) {
        document.getElementById(id).addEventListener('click', () => {
            setTimeout(() => { document.getElementById('tab-content').innerHTML = panels[id]; }, 50);
        });
    }
    </script>
</body>
</html>"#;

const FRAMED: &str = r#"<!DOCTYPE html>
<html>
<body>
    <h1>Store locator</h1>
    <iframe src="/frame"></iframe>
</body>
</html>"#;

fn create_app() -> Router {
    Router::new()
        .route("/", get(|| async { Html(fixtures::STATIC_PAGE) }))
        .route("/tabs", get(|| async { Html(LIVE_TABS) }))
        .route("/framed", get(|| async { Html(FRAMED) }))
        .route(
            "/frame",
            get(|| async { Html("<html><body><p>Open daily 9 to 5</p></body></html>") }),
        )
}

/// Start the test server once for all tests
pub async fn ensure_test_server() -> &'static TestServerHandle {
    TEST_SERVER
        .get_or_init(|| async {
            let std_listener =
                std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
            std_listener
                .set_nonblocking(true)
                .expect("Failed to configure test listener");
            let addr = std_listener.local_addr().unwrap();

            // Own runtime so the server outlives any single test's runtime
            std::thread::spawn(move || {
                let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
                runtime.block_on(async {
                    let listener = tokio::net::TcpListener::from_std(std_listener)
                        .expect("Failed to adopt test listener");
                    axum::serve(listener, create_app())
                        .await
                        .expect("Test server failed");
                });
            });

            TestServerHandle {
                addr,
                base_url: format!("http://{}", addr),
            }
        })
        .await
}
