//! Stacked request graph over several nginx instances.

use std::time::Duration;

use crate::collector::{CollectorError, GraphSpec, Plugin, RawSample};
use crate::config::PluginOptions;
use crate::render::RenderContext;

/// Stack colors, reused in order when there are more ids than colors.
const COLORS: [&str; 4] = ["#FFA500", "#FF7F50", "#FF0000", "#FF00FF"];

/// Render-only plugin reading the `requests` field of other nginx databases.
///
/// It never polls and owns no database.
#[derive(Debug, Clone, Default)]
pub struct NginxCombinedPlugin {
    ids: Vec<String>,
}

#[async_trait::async_trait]
impl Plugin for NginxCombinedPlugin {
    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    fn uses_database(&self) -> bool {
        false
    }

    fn init(&mut self, options: &mut PluginOptions) -> Result<(), CollectorError> {
        if options.ids.is_empty() {
            return Err(CollectorError::Config(
                "'ids' must name at least one nginx plugin".to_string(),
            ));
        }
        self.ids = options.ids.clone();
        Ok(())
    }

    async fn poll(&self) -> Result<RawSample, CollectorError> {
        Err(CollectorError::Unsupported(
            "combined graphs are render-only".to_string(),
        ))
    }

    fn render_specs(&self, ctx: &RenderContext) -> Vec<Vec<String>> {
        let title = format!("Combined requests on [{}]", self.ids.join(", "));
        let mut graph = GraphSpec::exact(title, "requests/sec");

        for (i, id) in self.ids.iter().enumerate() {
            graph = graph.line(format!(
                "DEF:requests{i}={}:requests:AVERAGE",
                ctx.store_path(id).display()
            ));
        }
        for (i, (id, color)) in self.ids.iter().zip(COLORS.iter().cycle()).enumerate() {
            let stack = if i == 0 { "" } else { ":STACK" };
            graph = graph
                .line(format!("AREA:requests{i}{color}:{id}{stack}"))
                .summary(&format!("requests{i}"), "%5.1lf %S", "req/sec");
        }

        vec![graph.build()]
    }
}
