//! JavaScript Plugin Bindings
//!
//! This module provides the bridge between Rust and the plugin sandbox:
//! - Deno ops for network access, storage, HTML parsing and URL helpers
//! - The JavaScript prelude that builds the `require` allow-list on top of those ops
//! - `create_plugin_runtime`, which assembles both into a fresh `JsRuntime`
//!
//! Every policy lives on the Rust side of an op (allowed HTTP methods,
//! storage namespacing), so plugin code reaching `Deno.core.ops` directly
//! gains nothing over `require`.

use anyhow::{anyhow, bail, Context, Result};
use deno_core::{op2, Extension, JsRuntime, Op, OpState, RuntimeOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::html::HtmlArena;
use super::kv_storage::{ScopedStorage, StorageArea};
use super::proto::{decode_message, strip_grpc_web_frame};
use super::urls::is_absolute_url;

/// Per-plugin state stored in the runtime's `OpState`
#[derive(Clone)]
pub struct SandboxContext {
    pub plugin_id: String,
    pub user_agent: String,
    pub default_cover: String,
    pub client: reqwest::Client,
    pub storage: ScopedStorage,
}

/// Request options accepted by the fetch ops
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FetchInit {
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    ok: bool,
    status: u16,
    status_text: String,
    url: String,
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Debug, Serialize)]
struct UrlParts {
    href: String,
    protocol: String,
    host: String,
    hostname: String,
    port: String,
    pathname: String,
    search: String,
    hash: String,
    origin: String,
}

fn sandbox_context(state: &Rc<RefCell<OpState>>) -> SandboxContext {
    state.borrow().borrow::<SandboxContext>().clone()
}

fn build_request(context: &SandboxContext, url: &str, init: FetchInit) -> Result<reqwest::RequestBuilder> {
    let method = init
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let mut request = match method.as_str() {
        "GET" => context.client.get(url),
        "POST" => context.client.post(url),
        other => bail!("HTTP method {} is not available to plugins", other),
    };

    for (name, value) in &init.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = init.body {
        request = request.body(body);
    }

    debug!(plugin = %context.plugin_id, method = %method, url = %url, "Plugin fetch");
    Ok(request)
}

#[op2(async)]
#[serde]
async fn op_folio_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[serde] init: Option<FetchInit>,
) -> Result<FetchResponse, anyhow::Error> {
    let context = sandbox_context(&state);
    let response = build_request(&context, &url, init.unwrap_or_default())?
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let status = response.status();
    let final_url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = response.text().await?;

    Ok(FetchResponse {
        ok: status.is_success(),
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        url: final_url,
        headers,
        body,
    })
}

#[op2(async)]
#[serde]
async fn op_folio_fetch_proto(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[serde] init: Option<FetchInit>,
) -> Result<serde_json::Value, anyhow::Error> {
    let context = sandbox_context(&state);
    let response = build_request(&context, &url, init.unwrap_or_default())?
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Request to {} failed with status {}", url, status);
    }
    let grpc = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("grpc"));

    let bytes = response.bytes().await?;
    let payload = if grpc { strip_grpc_web_frame(&bytes) } else { &bytes[..] };
    Ok(Value::Object(decode_message(payload)?))
}

#[op2(fast)]
fn op_folio_log(state: &mut OpState, #[string] level: &str, #[string] message: &str) {
    let plugin = &state.borrow::<SandboxContext>().plugin_id;
    match level {
        "error" => error!(plugin = %plugin, "{}", message),
        "warn" => warn!(plugin = %plugin, "{}", message),
        "debug" => debug!(plugin = %plugin, "{}", message),
        _ => info!(plugin = %plugin, "{}", message),
    }
}

#[op2]
#[serde]
fn op_folio_storage_get(
    state: &mut OpState,
    #[serde] area: StorageArea,
    #[string] key: String,
) -> Result<Option<Value>, anyhow::Error> {
    Ok(state.borrow::<SandboxContext>().storage.get(area, &key)?)
}

#[op2]
fn op_folio_storage_set(
    state: &mut OpState,
    #[serde] area: StorageArea,
    #[string] key: String,
    #[serde] value: serde_json::Value,
    expires: Option<f64>,
) -> Result<(), anyhow::Error> {
    let expires = expires.map(|ms| ms as i64);
    Ok(state
        .borrow::<SandboxContext>()
        .storage
        .set(area, &key, value, expires)?)
}

#[op2]
fn op_folio_storage_delete(
    state: &mut OpState,
    #[serde] area: StorageArea,
    #[string] key: String,
) -> Result<(), anyhow::Error> {
    Ok(state.borrow::<SandboxContext>().storage.delete(area, &key)?)
}

#[op2]
#[serde]
fn op_folio_storage_keys(state: &mut OpState, #[serde] area: StorageArea) -> Result<Vec<String>, anyhow::Error> {
    Ok(state.borrow::<SandboxContext>().storage.keys(area)?)
}

#[op2]
fn op_folio_storage_clear(state: &mut OpState, #[serde] area: StorageArea) -> Result<(), anyhow::Error> {
    Ok(state.borrow::<SandboxContext>().storage.clear(area)?)
}

#[op2(fast)]
fn op_folio_html_load(state: &mut OpState, #[string] markup: &str) -> u32 {
    state.borrow_mut::<HtmlArena>().load(markup)
}

#[op2]
#[serde]
fn op_folio_html_select(
    state: &mut OpState,
    doc: u32,
    #[serde] scope: Vec<u32>,
    #[string] selector: String,
) -> Result<Vec<u32>, anyhow::Error> {
    state.borrow::<HtmlArena>().select(doc, &scope, &selector)
}

#[op2]
#[serde]
fn op_folio_html_children(
    state: &mut OpState,
    doc: u32,
    #[serde] nodes: Vec<u32>,
    #[string] selector: Option<String>,
) -> Result<Vec<u32>, anyhow::Error> {
    state
        .borrow::<HtmlArena>()
        .children(doc, &nodes, selector.as_deref())
}

#[op2]
#[serde]
fn op_folio_html_parent(state: &mut OpState, doc: u32, #[serde] nodes: Vec<u32>) -> Result<Vec<u32>, anyhow::Error> {
    state.borrow::<HtmlArena>().parent(doc, &nodes)
}

#[op2]
#[string]
fn op_folio_html_text(state: &mut OpState, doc: u32, #[serde] nodes: Vec<u32>) -> Result<String, anyhow::Error> {
    state.borrow::<HtmlArena>().text(doc, &nodes)
}

#[op2]
#[string]
fn op_folio_html_html(state: &mut OpState, doc: u32, node: u32, outer: bool) -> Result<Option<String>, anyhow::Error> {
    let arena = state.borrow::<HtmlArena>();
    if outer {
        arena.outer_html(doc, node)
    } else {
        arena.inner_html(doc, node)
    }
}

#[op2]
#[string]
fn op_folio_html_attr(
    state: &mut OpState,
    doc: u32,
    node: u32,
    #[string] name: String,
) -> Result<Option<String>, anyhow::Error> {
    state.borrow::<HtmlArena>().attr(doc, node, &name)
}

#[op2]
#[serde]
fn op_folio_html_attrs(state: &mut OpState, doc: u32, node: u32) -> Result<HashMap<String, String>, anyhow::Error> {
    state.borrow::<HtmlArena>().attrs(doc, node)
}

#[op2]
#[string]
fn op_folio_html_name(state: &mut OpState, doc: u32, node: u32) -> Result<Option<String>, anyhow::Error> {
    state.borrow::<HtmlArena>().tag_name(doc, node)
}

#[op2]
#[string]
fn op_folio_url_encode(#[string] input: String) -> String {
    urlencoding::encode(&input).into_owned()
}

#[op2]
#[string]
fn op_folio_url_decode(#[string] input: String) -> Result<String, anyhow::Error> {
    Ok(urlencoding::decode(&input)?.into_owned())
}

#[op2]
#[serde]
fn op_folio_url_parse(#[string] input: String, #[string] base: Option<String>) -> Result<UrlParts, anyhow::Error> {
    let url = match base {
        Some(base) => Url::parse(&base)
            .with_context(|| format!("Invalid base URL {}", base))?
            .join(&input)?,
        None => Url::parse(&input).with_context(|| format!("Invalid URL {}", input))?,
    };

    let hostname = url.host_str().unwrap_or_default().to_string();
    let port = url.port().map(|p| p.to_string()).unwrap_or_default();
    Ok(UrlParts {
        href: url.to_string(),
        protocol: format!("{}:", url.scheme()),
        host: if port.is_empty() {
            hostname.clone()
        } else {
            format!("{}:{}", hostname, port)
        },
        hostname,
        port,
        pathname: url.path().to_string(),
        search: url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        hash: url.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
        origin: url.origin().ascii_serialization(),
    })
}

#[op2(fast)]
fn op_folio_is_absolute_url(#[string] url: &str) -> bool {
    is_absolute_url(url)
}

/// Create a JavaScript runtime with the sandbox ops and prelude installed
pub fn create_plugin_runtime(context: SandboxContext) -> Result<JsRuntime> {
    let ext = Extension {
        name: "folio_sandbox",
        ops: std::borrow::Cow::Borrowed(&[
            op_folio_fetch::DECL,
            op_folio_fetch_proto::DECL,
            op_folio_log::DECL,
            op_folio_storage_get::DECL,
            op_folio_storage_set::DECL,
            op_folio_storage_delete::DECL,
            op_folio_storage_keys::DECL,
            op_folio_storage_clear::DECL,
            op_folio_html_load::DECL,
            op_folio_html_select::DECL,
            op_folio_html_children::DECL,
            op_folio_html_parent::DECL,
            op_folio_html_text::DECL,
            op_folio_html_html::DECL,
            op_folio_html_attr::DECL,
            op_folio_html_attrs::DECL,
            op_folio_html_name::DECL,
            op_folio_url_encode::DECL,
            op_folio_url_decode::DECL,
            op_folio_url_parse::DECL,
            op_folio_is_absolute_url::DECL,
        ]),
        ..Default::default()
    };

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ext],
        ..Default::default()
    });

    let config = json!({
        "pluginId": context.plugin_id,
        "defaultCover": context.default_cover,
    });
    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(context);
        state.put(HtmlArena::new());
    }

    let config_code = format!("globalThis.__folio_config = {};", config);
    runtime
        .execute_script("<folio_config>", config_code.into())
        .context("Failed to install sandbox configuration")?;
    runtime
        .execute_script("<folio_prelude>", PRELUDE.to_string().into())
        .context("Failed to initialize JavaScript bindings")?;

    Ok(runtime)
}

/// Drop the HTML documents parsed by earlier calls
pub fn reset_call_state(runtime: &mut JsRuntime) {
    let op_state = runtime.op_state();
    op_state.borrow_mut().borrow_mut::<HtmlArena>().clear();
}

/// Read a script's completion value as a string
pub fn completion_string(runtime: &mut JsRuntime, value: deno_core::v8::Global<deno_core::v8::Value>) -> Result<String> {
    let scope = &mut runtime.handle_scope();
    let local = deno_core::v8::Local::new(scope, value);
    local
        .to_string(scope)
        .map(|s| s.to_rust_string_lossy(scope))
        .ok_or_else(|| anyhow!("Script result is not convertible to a string"))
}

const PRELUDE: &str = r##"
"use strict";
((globalThis) => {
  const ops = Deno.core.ops;
  const config = globalThis.__folio_config;
  delete globalThis.__folio_config;

  // console routed to tracing with the plugin id attached
  const stringify = (value) => {
    if (typeof value === "string") return value;
    try { return JSON.stringify(value); } catch (_) { return String(value); }
  };
  const log = (level) => (...args) => ops.op_folio_log(level, args.map(stringify).join(" "));
  globalThis.console = {
    log: log("info"),
    info: log("info"),
    debug: log("debug"),
    warn: log("warn"),
    error: log("error"),
  };

  class Headers {
    constructor(init) {
      this.map = new Map();
      if (init instanceof Headers) {
        init.forEach((value, key) => this.append(key, value));
      } else if (Array.isArray(init)) {
        init.forEach(([key, value]) => this.append(key, value));
      } else if (init) {
        Object.keys(init).forEach((key) => this.append(key, init[key]));
      }
    }
    append(name, value) {
      name = String(name).toLowerCase();
      value = String(value);
      if (this.map.has(name)) this.map.get(name).push(value);
      else this.map.set(name, [value]);
    }
    delete(name) { this.map.delete(String(name).toLowerCase()); }
    get(name) {
      const values = this.map.get(String(name).toLowerCase());
      return values ? values.join(", ") : null;
    }
    has(name) { return this.map.has(String(name).toLowerCase()); }
    set(name, value) { this.map.set(String(name).toLowerCase(), [String(value)]); }
    forEach(callback, thisArg) {
      for (const [name, values] of this.map) callback.call(thisArg, values.join(", "), name, this);
    }
  }
  globalThis.Headers = Headers;

  const decodeParam = (s) => {
    try { return ops.op_folio_url_decode(s.replace(/\+/g, " ")); } catch (_) { return s; }
  };

  class URLSearchParams {
    constructor(init) {
      this._entries = [];
      if (typeof init === "string") {
        const query = init.startsWith("?") ? init.slice(1) : init;
        for (const pair of query.split("&")) {
          if (!pair) continue;
          const [key, ...rest] = pair.split("=");
          this._entries.push([decodeParam(key), decodeParam(rest.join("="))]);
        }
      } else if (Array.isArray(init)) {
        for (const [key, value] of init) this.append(key, value);
      } else if (init && typeof init === "object") {
        for (const key of Object.keys(init)) this.append(key, init[key]);
      }
    }
    append(key, value) { this._entries.push([String(key), String(value)]); }
    set(key, value) { this.delete(key); this.append(key, value); }
    get(key) {
      const entry = this._entries.find(([name]) => name === key);
      return entry ? entry[1] : null;
    }
    getAll(key) { return this._entries.filter(([name]) => name === key).map(([, value]) => value); }
    has(key) { return this._entries.some(([name]) => name === key); }
    delete(key) { this._entries = this._entries.filter(([name]) => name !== key); }
    forEach(callback, thisArg) {
      for (const [key, value] of this._entries) callback.call(thisArg, value, key, this);
    }
    entries() { return this._entries.map((entry) => entry.slice())[Symbol.iterator](); }
    [Symbol.iterator]() { return this.entries(); }
    toString() {
      return this._entries
        .map(([key, value]) => `${ops.op_folio_url_encode(key)}=${ops.op_folio_url_encode(value)}`)
        .join("&");
    }
  }
  globalThis.URLSearchParams = URLSearchParams;

  class URL {
    constructor(input, base) {
      Object.assign(this, ops.op_folio_url_parse(String(input), base === undefined ? null : String(base)));
      this.searchParams = new URLSearchParams(this.search);
    }
    toString() { return this.href; }
    toJSON() { return this.href; }
  }
  globalThis.URL = URL;

  // @libs/fetch
  const hasHeader = (headers, name) => Object.keys(headers).some((key) => key.toLowerCase() === name);
  const toRequestInit = (init) => {
    const headers = {};
    if (!init) return { headers };
    const source = init.headers;
    if (source instanceof Headers) source.forEach((value, key) => { headers[key] = value; });
    else if (Array.isArray(source)) source.forEach(([key, value]) => { headers[key] = String(value); });
    else if (source) Object.keys(source).forEach((key) => { headers[key] = String(source[key]); });

    let body = init.body;
    if (body instanceof URLSearchParams) {
      body = body.toString();
      if (!hasHeader(headers, "content-type")) headers["Content-Type"] = "application/x-www-form-urlencoded";
    } else if (body !== undefined && body !== null && typeof body !== "string") {
      body = JSON.stringify(body);
      if (!hasHeader(headers, "content-type")) headers["Content-Type"] = "application/json";
    }
    return { method: init.method ?? null, headers, body: body ?? null };
  };

  const fetchApi = async (url, init) => {
    const response = await ops.op_folio_fetch(String(url), toRequestInit(init));
    return {
      ok: response.ok,
      status: response.status,
      statusText: response.statusText,
      url: response.url,
      headers: new Headers(response.headers),
      text: async () => response.body,
      json: async () => JSON.parse(response.body),
    };
  };
  const fetchText = async (url, init) => {
    const response = await fetchApi(url, init);
    if (!response.ok) throw new Error(`Request to ${url} failed with status ${response.status}`);
    return response.text();
  };
  const fetchProto = async (url, init) => ops.op_folio_fetch_proto(String(url), toRequestInit(init));
  globalThis.fetch = fetchApi;

  // cheerio
  class Element {
    constructor(doc, node) { this._doc = doc; this._node = node; }
    get type() { return this._node === 0 ? "root" : "tag"; }
    get name() { return ops.op_folio_html_name(this._doc, this._node) ?? undefined; }
    get tagName() { return this.name; }
    get attribs() { return ops.op_folio_html_attrs(this._doc, this._node); }
  }

  const mapped = (items) => {
    items.get = (index) => (index === undefined ? items.slice() : items[index]);
    items.toArray = () => items.slice();
    return items;
  };

  class Selection {
    constructor(doc, nodes) {
      this._doc = doc;
      this._nodes = nodes;
      this.length = nodes.length;
      nodes.forEach((node, i) => { this[i] = new Element(doc, node); });
    }
    _wrap(nodes) { return new Selection(this._doc, nodes); }
    find(selector) { return this._wrap(ops.op_folio_html_select(this._doc, this._nodes, String(selector))); }
    children(selector) {
      return this._wrap(ops.op_folio_html_children(this._doc, this._nodes, selector === undefined ? null : String(selector)));
    }
    parent() { return this._wrap(ops.op_folio_html_parent(this._doc, this._nodes)); }
    first() { return this.eq(0); }
    last() { return this.eq(-1); }
    eq(index) {
      const i = index < 0 ? this._nodes.length + index : index;
      return this._wrap(i >= 0 && i < this._nodes.length ? [this._nodes[i]] : []);
    }
    get(index) {
      const all = this.toArray();
      return index === undefined ? all : all[index < 0 ? all.length + index : index];
    }
    toArray() { return this._nodes.map((node) => new Element(this._doc, node)); }
    each(fn) {
      const elements = this.toArray();
      for (let i = 0; i < elements.length; i++) {
        if (fn.call(elements[i], i, elements[i]) === false) break;
      }
      return this;
    }
    map(fn) {
      const out = [];
      this.toArray().forEach((el, i) => {
        const value = fn.call(el, i, el);
        if (value === null || value === undefined) return;
        if (Array.isArray(value)) out.push(...value);
        else out.push(value);
      });
      return mapped(out);
    }
    filter(test) {
      if (typeof test === "function") {
        return this._wrap(this._nodes.filter((node, i) => {
          const el = new Element(this._doc, node);
          return test.call(el, i, el);
        }));
      }
      const matches = new Set(ops.op_folio_html_select(this._doc, [0], String(test)));
      return this._wrap(this._nodes.filter((node) => matches.has(node)));
    }
    text() { return ops.op_folio_html_text(this._doc, this._nodes); }
    html() { return this._nodes.length ? ops.op_folio_html_html(this._doc, this._nodes[0], false) : null; }
    attr(name) {
      if (!this._nodes.length) return undefined;
      return ops.op_folio_html_attr(this._doc, this._nodes[0], String(name)) ?? undefined;
    }
  }

  const load = (markup) => {
    const doc = ops.op_folio_html_load(String(markup ?? ""));
    const $ = (selector, context) => {
      if (selector instanceof Selection) return selector;
      if (selector instanceof Element) return new Selection(selector._doc, [selector._node]);
      if (Array.isArray(selector)) {
        return new Selection(doc, selector.filter((el) => el instanceof Element).map((el) => el._node));
      }
      if (typeof selector !== "string") return new Selection(doc, []);
      if (context !== undefined) return $(context).find(selector);
      return new Selection(doc, ops.op_folio_html_select(doc, [0], selector));
    };
    $.root = () => new Selection(doc, [0]);
    $.html = (target) => {
      const selection = target === undefined ? $.root() : $(target);
      return selection.length ? ops.op_folio_html_html(selection._doc, selection._nodes[0], true) : null;
    };
    $.text = (target) => (target === undefined ? $.root() : $(target)).text();
    return $;
  };

  // dayjs
  const UNIT_ALIASES = { ms: "millisecond", s: "second", m: "minute", h: "hour", d: "day", w: "week", M: "month", y: "year" };
  const UNIT_MS = { millisecond: 1, second: 1e3, minute: 6e4, hour: 36e5, day: 864e5, week: 6048e5 };
  const normalizeUnit = (unit) => {
    if (unit === undefined) return "millisecond";
    if (UNIT_ALIASES[unit]) return UNIT_ALIASES[unit];
    return String(unit).toLowerCase().replace(/s$/, "");
  };
  const pad = (n, width = 2) => String(Math.abs(n)).padStart(width, "0");

  class Dayjs {
    constructor(input) {
      if (input instanceof Dayjs) this._d = new Date(input.valueOf());
      else if (input === undefined) this._d = new Date();
      else if (input === null) this._d = new Date(NaN);
      else this._d = new Date(input instanceof Date ? input.getTime() : input);
    }
    isValid() { return !Number.isNaN(this._d.getTime()); }
    valueOf() { return this._d.getTime(); }
    unix() { return Math.floor(this.valueOf() / 1000); }
    toDate() { return new Date(this.valueOf()); }
    toISOString() { return this._d.toISOString(); }
    toJSON() { return this.isValid() ? this.toISOString() : null; }
    toString() { return this._d.toUTCString(); }
    add(amount, unit) {
      const name = normalizeUnit(unit);
      const date = new Date(this.valueOf());
      if (name === "month") date.setMonth(date.getMonth() + Number(amount));
      else if (name === "year") date.setFullYear(date.getFullYear() + Number(amount));
      else if (UNIT_MS[name]) date.setTime(date.getTime() + Number(amount) * UNIT_MS[name]);
      return new Dayjs(date);
    }
    subtract(amount, unit) { return this.add(-Number(amount), unit); }
    format(template = "YYYY-MM-DDTHH:mm:ssZ") {
      if (!this.isValid()) return "Invalid Date";
      const d = this._d;
      const offset = -d.getTimezoneOffset();
      const tokens = {
        YYYY: () => String(d.getFullYear()),
        YY: () => String(d.getFullYear()).slice(-2),
        MM: () => pad(d.getMonth() + 1),
        M: () => String(d.getMonth() + 1),
        DD: () => pad(d.getDate()),
        D: () => String(d.getDate()),
        HH: () => pad(d.getHours()),
        H: () => String(d.getHours()),
        mm: () => pad(d.getMinutes()),
        ss: () => pad(d.getSeconds()),
        SSS: () => pad(d.getMilliseconds(), 3),
        Z: () => `${offset >= 0 ? "+" : "-"}${pad(Math.floor(Math.abs(offset) / 60))}:${pad(Math.abs(offset) % 60)}`,
      };
      return String(template).replace(
        /\[([^\]]*)]|YYYY|YY|SSS|MM|M|DD|D|HH|H|mm|ss|Z/g,
        (match, escaped) => escaped ?? tokens[match](),
      );
    }
  }
  const dayjs = (input) => new Dayjs(input);
  dayjs.default = dayjs;
  dayjs.unix = (seconds) => new Dayjs(Number(seconds) * 1000);
  dayjs.extend = () => dayjs;

  // @libs/storage
  const storageHandle = (area) => Object.freeze({
    get: (key) => {
      const value = ops.op_folio_storage_get(area, String(key));
      return value === null ? undefined : value;
    },
    set: (key, value, expires) => ops.op_folio_storage_set(
      area,
      String(key),
      value === undefined ? null : value,
      expires instanceof Date ? expires.getTime() : typeof expires === "number" ? expires : null,
    ),
    delete: (key) => ops.op_folio_storage_delete(area, String(key)),
    getAllKeys: () => ops.op_folio_storage_keys(area),
    clearAll: () => ops.op_folio_storage_clear(area),
  });

  const NovelStatus = Object.freeze({
    Unknown: "Unknown",
    Ongoing: "Ongoing",
    Completed: "Completed",
    Licensed: "Licensed",
    PublishingFinished: "Publishing Finished",
    Cancelled: "Cancelled",
    OnHiatus: "On Hiatus",
  });

  const FilterTypes = Object.freeze({
    TextInput: "Text",
    Picker: "Picker",
    CheckboxGroup: "Checkbox",
    Switch: "Switch",
    ExcludableCheckboxGroup: "XCheckbox",
  });

  const cheerio = Object.freeze({ load });
  const modules = Object.freeze({
    "cheerio": cheerio,
    "htmlparser2": cheerio,
    "dayjs": dayjs,
    "urlencode": Object.freeze({
      encode: (value) => ops.op_folio_url_encode(String(value)),
      decode: (value) => ops.op_folio_url_decode(String(value)),
    }),
    "@libs/novelStatus": Object.freeze({ NovelStatus }),
    "@libs/fetch": Object.freeze({ fetchApi, fetchText, fetchProto }),
    "@libs/isAbsoluteUrl": Object.freeze({ isUrlAbsolute: (url) => ops.op_folio_is_absolute_url(String(url)) }),
    "@libs/filterInputs": Object.freeze({ FilterTypes }),
    "@libs/defaultCover": Object.freeze({ defaultCover: config.defaultCover }),
    "@libs/storage": Object.freeze({
      storage: storageHandle("storage"),
      localStorage: storageHandle("localStorage"),
      sessionStorage: storageHandle("sessionStorage"),
    }),
  });

  const require = (name) => (Object.prototype.hasOwnProperty.call(modules, name) ? modules[name] : undefined);

  const CONTRACT_KEYS = [
    "id", "name", "version", "site",
    "searchNovels", "parseNovel", "parseChapter",
    "parsePage", "resolveUrl", "popularNovels",
  ];

  globalThis.__folio = {
    require,
    plugin: undefined,
    describe(exported) {
      const plugin = exported && exported.default !== undefined ? exported.default : exported;
      if (plugin === null || (typeof plugin !== "object" && typeof plugin !== "function")) return "null";
      this.plugin = plugin;
      const kinds = {};
      for (const key of CONTRACT_KEYS) kinds[key] = typeof plugin[key];
      return JSON.stringify({
        id: plugin.id,
        name: plugin.name,
        version: plugin.version,
        site: plugin.site,
        lang: plugin.lang,
        icon: plugin.icon,
        filters: plugin.filters,
        imageRequestInit: plugin.imageRequestInit,
        kinds,
      });
    },
  };

  globalThis._folio_invoke = async function (method, args) {
    globalThis._folio_status = "pending";
    globalThis._folio_result = undefined;
    globalThis._folio_error = undefined;
    try {
      const plugin = globalThis.__folio.plugin;
      const fn = plugin ? plugin[method] : undefined;
      if (typeof fn !== "function") throw new Error(`Plugin does not implement ${method}`);
      const result = await fn.apply(plugin, args);
      globalThis._folio_result = JSON.stringify(result === undefined ? null : result);
      globalThis._folio_status = "success";
    } catch (e) {
      globalThis._folio_error = e instanceof Error ? `${e.name}: ${e.message}` : String(e);
      globalThis._folio_status = "error";
    }
  };
})(globalThis);
"##;
