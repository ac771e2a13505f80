use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ScanError;
use crate::models::{Endpoint, HttpMethod, ParamLocation, Parameter};

/// Parsed crawl output: endpoints uniqued by `(method, url)` with
/// union-merged parameter sets, plus the flattened parameter list.
#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    pub endpoints: Vec<Endpoint>,
    pub parameters: Vec<Parameter>,
}

/// Sidecar target files written next to the scan output.
#[derive(Debug, Clone)]
pub struct TargetsFiles {
    pub get_path: PathBuf,
    pub post_path: PathBuf,
    pub get_count: usize,
    pub post_count: usize,
}

/// Splits `key=value&...` into parameter names; empty keys are dropped.
fn param_names(encoded: &str) -> Vec<String> {
    encoded
        .split('&')
        .filter_map(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            if key.is_empty() {
                None
            } else {
                Some(key.to_string())
            }
        })
        .collect()
}

fn query_of(url: &str) -> Option<&str> {
    url.split_once('?').map(|(_, q)| q)
}

/// Parses crawler CSV content. Each row is `<url>[,<postData>]`; the first
/// comma separates the URL from the POST body, and a row without a comma is a
/// GET target. The result is independent of row order and duplication.
pub fn parse_crawl_csv(content: &str) -> CrawlResult {
    let mut endpoints: BTreeMap<(HttpMethod, String), Endpoint> = BTreeMap::new();
    let mut locations: BTreeMap<(HttpMethod, String, String), ParamLocation> = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case("url,post data") {
            continue;
        }

        let (url, post_data) = match line.split_once(',') {
            Some((url, body)) => (url.trim(), Some(body.trim().to_string())),
            None => (line, None),
        };
        if url.is_empty() {
            continue;
        }

        let method = if post_data.is_some() {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        };

        let entry = endpoints
            .entry((method, url.to_string()))
            .or_insert_with(|| Endpoint::new(url, method));
        if entry.post_data.is_none() {
            entry.post_data = post_data.clone();
        }

        let query_params = query_of(url).map(param_names).unwrap_or_default();
        let body_params = post_data
            .as_deref()
            .map(param_names)
            .unwrap_or_default();

        entry.merge_parameters(query_params.iter().cloned());
        entry.merge_parameters(body_params.iter().cloned());

        for name in query_params {
            locations.insert((method, url.to_string(), name), ParamLocation::Query);
        }
        for name in body_params {
            // A name seen in the query anywhere keeps the query location.
            locations
                .entry((method, url.to_string(), name))
                .or_insert(ParamLocation::Body);
        }
    }

    let parameters = locations
        .into_iter()
        .map(|((method, url, name), location)| Parameter {
            endpoint_url: url,
            method,
            name,
            location,
            testable: true,
        })
        .collect();

    CrawlResult {
        endpoints: endpoints.into_values().collect(),
        parameters,
    }
}

pub async fn parse_crawl_csv_file(path: &Path) -> Result<CrawlResult, ScanError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_crawl_csv(&content))
}

/// Writes the GET and POST target files: plain URLs for GET, and
/// `url|||postData` rows for POST.
pub async fn write_targets_files(
    scan_dir: &Path,
    result: &CrawlResult,
) -> Result<TargetsFiles, ScanError> {
    tokio::fs::create_dir_all(scan_dir).await?;

    let get_targets: Vec<&str> = result
        .endpoints
        .iter()
        .filter(|e| e.method == HttpMethod::Get)
        .map(|e| e.url.as_str())
        .collect();
    let post_targets: Vec<String> = result
        .endpoints
        .iter()
        .filter(|e| e.method == HttpMethod::Post)
        .map(|e| format!("{}|||{}", e.url, e.post_data.as_deref().unwrap_or("")))
        .collect();

    let get_path = scan_dir.join("get_targets.txt");
    let post_path = scan_dir.join("post_targets.txt");
    tokio::fs::write(&get_path, get_targets.join("\n")).await?;
    tokio::fs::write(&post_path, post_targets.join("\n")).await?;

    Ok(TargetsFiles {
        get_path,
        post_path,
        get_count: get_targets.len(),
        post_count: post_targets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
http://site.test/products?id=1&cat=2
http://site.test/login,user=admin&pass=x
http://site.test/products?id=3
http://site.test/about
";

    #[test]
    fn test_get_and_post_rows() {
        let result = parse_crawl_csv(SAMPLE);
        assert_eq!(result.endpoints.len(), 4);
        let post = result
            .endpoints
            .iter()
            .find(|e| e.method == HttpMethod::Post)
            .unwrap();
        assert_eq!(post.url, "http://site.test/login");
        assert_eq!(post.post_data.as_deref(), Some("user=admin&pass=x"));
        assert!(post.parameters.contains("user"));
        assert!(post.parameters.contains("pass"));
    }

    #[test]
    fn test_same_endpoint_parameters_union_merged() {
        let result = parse_crawl_csv(SAMPLE);
        let products: Vec<&Endpoint> = result
            .endpoints
            .iter()
            .filter(|e| e.url.starts_with("http://site.test/products"))
            .collect();
        // Distinct query strings produce distinct endpoint URLs; merge the
        // duplicated one.
        let dup = parse_crawl_csv(
            "http://site.test/p?a=1\nhttp://site.test/p?a=1&b=2\nhttp://site.test/p?a=1\n",
        );
        assert_eq!(products.len(), 2);
        let merged = dup
            .endpoints
            .iter()
            .find(|e| e.url == "http://site.test/p?a=1")
            .unwrap();
        assert_eq!(merged.parameters.len(), 1);
        assert_eq!(dup.endpoints.len(), 2);
    }

    #[test]
    fn test_order_independence() {
        let mut lines: Vec<&str> = SAMPLE.lines().collect();
        let forward = parse_crawl_csv(&lines.join("\n"));
        lines.reverse();
        let backward = parse_crawl_csv(&lines.join("\n"));

        let key = |r: &CrawlResult| -> Vec<(HttpMethod, String, Vec<String>)> {
            r.endpoints
                .iter()
                .map(|e| {
                    (
                        e.method,
                        e.url.clone(),
                        e.parameters.iter().cloned().collect(),
                    )
                })
                .collect()
        };
        assert_eq!(key(&forward), key(&backward));
        assert_eq!(forward.parameters.len(), backward.parameters.len());
    }

    #[test]
    fn test_idempotence() {
        let once = parse_crawl_csv(SAMPLE);
        let doubled = parse_crawl_csv(&format!("{}{}", SAMPLE, SAMPLE));
        assert_eq!(once.endpoints.len(), doubled.endpoints.len());
        assert_eq!(once.parameters.len(), doubled.parameters.len());
    }

    #[test]
    fn test_empty_keys_dropped() {
        let result = parse_crawl_csv("http://site.test/x?=1&id=2&\n");
        let ep = &result.endpoints[0];
        assert_eq!(ep.parameters.len(), 1);
        assert!(ep.parameters.contains("id"));
    }

    #[test]
    fn test_header_row_skipped() {
        let result = parse_crawl_csv("URL,POST data\nhttp://site.test/a\n");
        assert_eq!(result.endpoints.len(), 1);
    }

    #[test]
    fn test_param_location_split() {
        let result =
            parse_crawl_csv("http://site.test/form?ref=home,field=value&ref=dup\n");
        let ref_param = result
            .parameters
            .iter()
            .find(|p| p.name == "ref")
            .unwrap();
        let field_param = result
            .parameters
            .iter()
            .find(|p| p.name == "field")
            .unwrap();
        assert_eq!(ref_param.location, ParamLocation::Query);
        assert_eq!(field_param.location, ParamLocation::Body);
    }

    #[tokio::test]
    async fn test_write_targets_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = parse_crawl_csv(SAMPLE);
        let files = write_targets_files(dir.path(), &result).await.unwrap();
        assert_eq!(files.get_count, 3);
        assert_eq!(files.post_count, 1);
        let get_content = std::fs::read_to_string(&files.get_path).unwrap();
        assert!(get_content.contains("http://site.test/about"));
        let post_content = std::fs::read_to_string(&files.post_path).unwrap();
        assert_eq!(post_content, "http://site.test/login|||user=admin&pass=x");
    }
}
