use crate::errors::ScanError;
use crate::exec::csv::{parse_crawl_csv, parse_crawl_csv_file, write_targets_files, CrawlResult};
use crate::models::LogLevel;
use crate::orchestrator::ScanOrchestrator;

impl ScanOrchestrator {
    /// Discovery: crawl the target, turn the crawler CSV into endpoint and
    /// parameter records, and fall back to the configured URL when the
    /// crawler comes back empty-handed.
    pub(crate) async fn run_discovery_phase(&self) -> Result<(), ScanError> {
        self.gate_on("discovery").await?;

        self.logger()
            .log("Iniciando descubrimiento de endpoints", LogLevel::Info);

        self.count_request();
        let csv_path = match self.sqlmap().run_crawl().await {
            Ok(path) => path,
            Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
            Err(e) => {
                // A crawl that cannot even spawn degrades to the base URL.
                self.logger()
                    .log(&format!("El crawler no pudo ejecutarse: {}", e), LogLevel::Error);
                None
            }
        };

        let mut result: Option<CrawlResult> = match &csv_path {
            Some(path) => match parse_crawl_csv_file(path).await {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    self.logger().log(
                        &format!("No se pudo leer el CSV {}: {}", path.display(), e),
                        LogLevel::Warning,
                    );
                    None
                }
            },
            None => None,
        };

        // Late CSV recovery: the crawler sometimes flushes its results file
        // after the process is gone.
        if result.as_ref().map(|r| r.endpoints.is_empty()).unwrap_or(true) {
            self.check_stopped()?;
            if let Some(path) = self.sqlmap().poll_for_csv().await {
                if let Ok(parsed) = parse_crawl_csv_file(&path).await {
                    if !parsed.endpoints.is_empty() {
                        result = Some(parsed);
                    }
                }
            }
        }

        let result = match result {
            Some(r) if !r.endpoints.is_empty() => r,
            _ => {
                self.logger().log(
                    "El crawler no produjo objetivos; usando la URL configurada",
                    LogLevel::Warning,
                );
                parse_crawl_csv(&format!("{}\n", self.config().target_url))
            }
        };

        for endpoint in result.endpoints.iter().cloned() {
            self.add_endpoint(endpoint);
        }
        for parameter in result.parameters.iter().cloned() {
            self.add_parameter(parameter);
        }

        let scan_dir = self.config().scan_dir(self.scan_id());
        match write_targets_files(&scan_dir, &result).await {
            Ok(files) => self.logger().log(
                &format!(
                    "Objetivos escritos: {} GET, {} POST en {}",
                    files.get_count,
                    files.post_count,
                    scan_dir.display()
                ),
                LogLevel::Info,
            ),
            Err(e) => self.logger().log(
                &format!("No se pudieron escribir los ficheros de objetivos: {}", e),
                LogLevel::Warning,
            ),
        }

        self.logger().log(
            &format!(
                "Descubrimiento finalizado: {} endpoints, {} parámetros",
                result.endpoints.len(),
                result.parameters.len()
            ),
            LogLevel::Success,
        );
        Ok(())
    }
}
