use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::client::PageSource;
use crate::domain::{CatalogRow, FileFormat, RawTable};
use crate::error::GeofabrikError;

pub trait PageTableExtractor {
    fn subregion_table(&self, page_url: &str) -> Result<Option<RawTable>, GeofabrikError>;
}

pub struct HtmlTableExtractor<'a, S: PageSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PageSource + ?Sized> HtmlTableExtractor<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    pub fn continent_links(&self, home_url: &str) -> Result<Vec<(String, String)>, GeofabrikError> {
        let html = self.source.fetch_page(home_url)?;
        parse_continent_links(&html, home_url)
    }
}

impl<S: PageSource + ?Sized> PageTableExtractor for HtmlTableExtractor<'_, S> {
    fn subregion_table(&self, page_url: &str) -> Result<Option<RawTable>, GeofabrikError> {
        let html = self.source.fetch_page(page_url)?;
        parse_subregion_table(&html, page_url)
    }
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(Special )?Sub[ \-]Regions?").expect("static regex"))
}

fn kml_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"\(\s*['"]([^'"]+)['"]\s*\)"#).expect("static regex"))
}

fn selector(page_url: &str, css: &str) -> Result<Selector, GeofabrikError> {
    Selector::parse(css).map_err(|err| GeofabrikError::PageParse {
        url: page_url.to_string(),
        message: format!("selector {css}: {err}"),
    })
}

fn parse_base(page_url: &str) -> Result<Url, GeofabrikError> {
    Url::parse(page_url).map_err(|err| GeofabrikError::InvalidUrl(format!("{page_url}: {err}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn join(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(String::from)
}

pub fn parse_subregion_table(
    html: &str,
    page_url: &str,
) -> Result<Option<RawTable>, GeofabrikError> {
    let base = parse_base(page_url)?;
    let document = Html::parse_document(html);
    let table_sel = selector(page_url, "table")?;
    let header_sel = selector(page_url, "th, caption")?;
    let row_sel = selector(page_url, "tr")?;
    let cell_sel = selector(page_url, "td")?;
    let link_sel = selector(page_url, "a[href]")?;

    let mut rows = Vec::new();
    for table in document.select(&table_sel) {
        let matches = table
            .select(&header_sel)
            .any(|header| header_pattern().is_match(&element_text(header)));
        if !matches {
            continue;
        }

        for tr in table.select(&row_sel) {
            let cells: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
            let Some(first) = cells.first() else {
                continue;
            };
            let name_link = first.select(&link_sel).next();
            let name = name_link
                .map(element_text)
                .unwrap_or_else(|| element_text(*first));
            if name.is_empty() {
                continue;
            }

            let subregion_url = name_link
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| join(&base, href))
                .or_else(|| {
                    tr.value()
                        .attr("onmouseover")
                        .and_then(|handler| kml_pattern().captures(handler))
                        .and_then(|caps| join(&base, &caps[1].replace("kml", "html")))
                })
                .unwrap_or_default();

            let mut row = CatalogRow::new(name, subregion_url);
            for link in tr.select(&link_sel) {
                let text = element_text(link);
                let Some(format) = FileFormat::ALL
                    .into_iter()
                    .find(|format| text == format.link_text())
                else {
                    continue;
                };
                let href = link.value().attr("href").unwrap_or_default();
                row.set_url(format, join(&base, href));
            }
            row.osm_pbf_size = cells.iter().skip(1).find_map(|cell| {
                let text = element_text(*cell).replace('\u{a0}', " ");
                let text = text.trim();
                (text.starts_with('(') && text.ends_with(')'))
                    .then(|| text.trim_matches(|ch| ch == '(' || ch == ')').trim().to_string())
            });
            rows.push(row);
        }
    }

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(RawTable {
        page_url: page_url.to_string(),
        rows,
    }))
}

pub fn parse_continent_links(
    html: &str,
    home_url: &str,
) -> Result<Vec<(String, String)>, GeofabrikError> {
    let base = parse_base(home_url)?;
    let document = Html::parse_document(html);
    let cell_sel = selector(home_url, "td.subregion")?;
    let link_sel = selector(home_url, "a[href]")?;

    let mut links = Vec::new();
    for cell in document.select(&cell_sel) {
        let Some(link) = cell.select(&link_sel).next() else {
            continue;
        };
        let name = element_text(link);
        let href = link.value().attr("href").unwrap_or_default();
        if let Some(url) = join(&base, href) {
            if !links.iter().any(|(existing, _): &(String, String)| *existing == name) {
                links.push((name, url));
            }
        }
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUROPE: &str = r#"
<html><body>
<table id="subregions">
  <tr><th>Sub Region</th><th colspan="2">Quick Links</th></tr>
  <tr onmouseover="loadkml('europe/great-britain.kml')">
    <td class="subregion"><a href="europe/great-britain.html">Great Britain</a></td>
    <td><a href="europe/great-britain-latest.osm.pbf">[.osm.pbf]</a></td>
    <td>(1.4&nbsp;GB)</td>
    <td></td>
    <td><a href="europe/great-britain-latest.osm.bz2">[.osm.bz2]</a></td>
  </tr>
  <tr onmouseover="loadkml('europe/malta.kml')">
    <td class="subregion">Malta</td>
    <td><a href="europe/malta-latest.osm.pbf">[.osm.pbf]</a></td>
    <td>(6.1&nbsp;MB)</td>
    <td><a href="europe/malta-latest-free.shp.zip">[.shp.zip]</a></td>
    <td><a href="europe/malta-latest.osm.bz2">[.osm.bz2]</a></td>
  </tr>
</table>
<table><tr><th>Other</th></tr><tr><td>ignored</td></tr></table>
</body></html>
"#;

    #[test]
    fn parses_rows_links_and_sizes() {
        let table = parse_subregion_table(EUROPE, "https://download.geofabrik.de/europe.html")
            .unwrap()
            .unwrap();
        assert_eq!(table.rows.len(), 2);

        let gb = &table.rows[0];
        assert_eq!(gb.subregion, "Great Britain");
        assert_eq!(
            gb.subregion_url,
            "https://download.geofabrik.de/europe/great-britain.html"
        );
        assert_eq!(gb.osm_pbf_size.as_deref(), Some("1.4 GB"));
        assert!(gb.shp_zip.is_none());
        assert_eq!(
            gb.osm_bz2.as_deref(),
            Some("https://download.geofabrik.de/europe/great-britain-latest.osm.bz2")
        );

        let malta = &table.rows[1];
        assert_eq!(malta.subregion_url, "https://download.geofabrik.de/europe/malta.html");
        assert_eq!(malta.pbf_size_bytes(), Some(6_100_000));
        assert!(malta.shp_zip.is_some());
    }

    #[test]
    fn page_without_subregions_is_none() {
        let html = "<html><body><p>Commonly used formats</p></body></html>";
        let table = parse_subregion_table(html, "https://download.geofabrik.de/europe/malta.html")
            .unwrap();
        assert!(table.is_none());
    }

    #[test]
    fn continent_links_are_absolute() {
        let html = r#"<table>
            <tr><td class="subregion"><a href="africa.html">Africa</a></td></tr>
            <tr><td class="subregion"><a href="europe.html">Europe</a></td></tr>
        </table>"#;
        let links = parse_continent_links(html, "https://download.geofabrik.de/").unwrap();
        assert_eq!(
            links,
            vec![
                ("Africa".to_string(), "https://download.geofabrik.de/africa.html".to_string()),
                ("Europe".to_string(), "https://download.geofabrik.de/europe.html".to_string()),
            ]
        );
    }
}
