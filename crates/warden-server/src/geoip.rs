//! [`HttpGeoLocator`]: a [`GeoLocator`] over an ip-api compatible endpoint.

use std::{net::IpAddr, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use warden_core::{
  Error as CoreError, Result,
  geo::{GeoLocator, GeoResult},
};

const FIELDS: &str = "status,message,country,city,lat,lon";

#[derive(Clone)]
pub struct HttpGeoLocator {
  client:   Client,
  base_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
  status:  String,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  country: String,
  #[serde(default)]
  city:    String,
  #[serde(default)]
  lat:     f64,
  #[serde(default)]
  lon:     f64,
}

impl HttpGeoLocator {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url: base_url.into() })
  }
}

impl GeoLocator for HttpGeoLocator {
  async fn lookup(&self, ip: IpAddr) -> Result<GeoResult> {
    let url = format!("{}/json/{ip}", self.base_url.trim_end_matches('/'));
    let lookup_err = |e: reqwest::Error| CoreError::GeoLookup(e.to_string());

    let body: LookupResponse = self
      .client
      .get(url)
      .query(&[("fields", FIELDS)])
      .send()
      .await
      .map_err(lookup_err)?
      .error_for_status()
      .map_err(lookup_err)?
      .json()
      .await
      .map_err(lookup_err)?;

    if body.status != "success" {
      let reason = body.message.unwrap_or(body.status);
      return Err(CoreError::GeoLookup(format!("lookup for {ip} failed: {reason}")));
    }

    Ok(GeoResult {
      ip:        ip.to_string(),
      latitude:  body.lat,
      longitude: body.lon,
      city:      body.city,
      country:   body.country,
    })
  }
}
