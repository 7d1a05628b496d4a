//! Script-facing functions. Every function closes over one runtime's bridge, so two runtimes
//! never see each other's state.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, INT};
use tracing::info;

use crate::assets::{AssetDefinition, AssetHandle, AssetKind, AssetRef};
use crate::bridge::Bridge;
use crate::commands::{Color, ColorStop, DrawCommand, Paint};
use crate::error::EngineError;
use crate::frame::PixelRegion;
use crate::pixels::{check_dimensions, create_image_data, PixelBuffer};

pub(crate) type SharedBridge = Rc<RefCell<Bridge>>;
pub(crate) type TickSlot = Rc<RefCell<Option<FnPtr>>>;
type FnResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) fn engine_error(err: EngineError) -> Box<EvalAltResult> {
    err.to_string().into()
}

/// Scripts pass integers and floats interchangeably.
fn num(value: &Dynamic) -> FnResult<f64> {
    if let Ok(float) = value.as_float() {
        return Ok(float);
    }
    if let Ok(int) = value.as_int() {
        return Ok(int as f64);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn int(value: &Dynamic) -> FnResult<i64> {
    if let Ok(int) = value.as_int() {
        return Ok(int);
    }
    num(value).map(|float| float.floor() as i64)
}

fn dimension(value: &Dynamic) -> FnResult<u32> {
    Ok(int(value)?.clamp(0, u32::MAX as i64) as u32)
}

fn volume(value: &Dynamic) -> FnResult<f32> {
    Ok(num(value)? as f32)
}

fn color(r: &Dynamic, g: &Dynamic, b: &Dynamic, a: Option<&Dynamic>) -> FnResult<Color> {
    let alpha = match a {
        Some(a) => Some(num(a)?),
        None => None,
    };
    Ok(Color::from_channels(num(r)?, num(g)?, num(b)?, alpha))
}

fn asset_ref(value: &Dynamic) -> FnResult<AssetRef> {
    if let Some(handle) = value.read_lock::<AssetHandle>() {
        return Ok(AssetRef::Handle(handle.id()));
    }
    if value.is_string() {
        return Ok(AssetRef::Name(value.to_string()));
    }
    Err(format!("expected an asset name or handle, got {}", value.type_name()).into())
}

/// Accepts `[offset, r, g, b, a?]` arrays or `#{offset, r, g, b, a}` maps.
fn color_stops(stops: &Array) -> FnResult<Vec<ColorStop>> {
    stops
        .iter()
        .map(|stop| -> FnResult<ColorStop> {
            if let Some(parts) = stop.read_lock::<Array>() {
                if parts.len() < 4 {
                    return Err("color stop arrays need [offset, r, g, b] and optional alpha".into());
                }
                let color = color(&parts[1], &parts[2], &parts[3], parts.get(4))?;
                return Ok(ColorStop { offset: num(&parts[0])?, color });
            }
            if let Some(map) = stop.read_lock::<Map>() {
                let field = |key: &str| map.get(key).cloned().unwrap_or(Dynamic::from_int(0));
                let alpha = map.get("a").cloned();
                let color = color(&field("r"), &field("g"), &field("b"), alpha.as_ref())?;
                return Ok(ColorStop { offset: num(&field("offset"))?, color });
            }
            Err(format!("expected a color stop, got {}", stop.type_name()).into())
        })
        .collect()
}

fn push(bridge: &SharedBridge, command: DrawCommand) {
    bridge.borrow_mut().push(command);
}

fn command0(engine: &mut Engine, bridge: &SharedBridge, name: &str, command: DrawCommand) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(name, move || push(&bridge, command.clone()));
}

fn command1(engine: &mut Engine, bridge: &SharedBridge, name: &str, build: fn(f64) -> DrawCommand) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(name, move |a: Dynamic| -> FnResult<()> {
        push(&bridge, build(num(&a)?));
        Ok(())
    });
}

fn command2(engine: &mut Engine, bridge: &SharedBridge, name: &str, build: fn(f64, f64) -> DrawCommand) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(name, move |a: Dynamic, b: Dynamic| -> FnResult<()> {
        push(&bridge, build(num(&a)?, num(&b)?));
        Ok(())
    });
}

fn command3(engine: &mut Engine, bridge: &SharedBridge, name: &str, build: fn(f64, f64, f64) -> DrawCommand) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| -> FnResult<()> {
        push(&bridge, build(num(&a)?, num(&b)?, num(&c)?));
        Ok(())
    });
}

fn command4(
    engine: &mut Engine,
    bridge: &SharedBridge,
    name: &str,
    build: fn(f64, f64, f64, f64) -> DrawCommand,
) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| -> FnResult<()> {
        push(&bridge, build(num(&a)?, num(&b)?, num(&c)?, num(&d)?));
        Ok(())
    });
}

fn command6(
    engine: &mut Engine,
    bridge: &SharedBridge,
    name: &str,
    build: fn(f64, f64, f64, f64, f64, f64) -> DrawCommand,
) {
    let bridge = Rc::clone(bridge);
    engine.register_fn(
        name,
        move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic, f: Dynamic| -> FnResult<()> {
            push(&bridge, build(num(&a)?, num(&b)?, num(&c)?, num(&d)?, num(&e)?, num(&f)?));
            Ok(())
        },
    );
}

pub(crate) fn register_lifecycle(engine: &mut Engine, bridge: &SharedBridge, tick: &TickSlot) {
    let slot = Rc::clone(tick);
    engine.register_fn("register_tick", move |callback: FnPtr| {
        *slot.borrow_mut() = Some(callback);
    });
    let b = Rc::clone(bridge);
    engine.register_fn("stop", move || b.borrow_mut().stop());
    let b = Rc::clone(bridge);
    engine.register_fn("is_active", move || b.borrow().is_active());
    let b = Rc::clone(bridge);
    engine.register_fn("frame_count", move || b.borrow().frames_run() as INT);

    engine.register_fn("random", |min: Dynamic, max: Dynamic| -> FnResult<f64> {
        let (min, max) = (num(&min)?, num(&max)?);
        if min.partial_cmp(&max) != Some(Ordering::Less) {
            return Ok(min);
        }
        Ok(rand::thread_rng().gen_range(min..max))
    });
    engine.register_fn("log", |message: Dynamic| {
        info!(target: "script", "[script] {message}");
    });
}

pub(crate) fn register_surface(engine: &mut Engine, bridge: &SharedBridge) {
    let b = Rc::clone(bridge);
    engine.register_fn("set_size", move |width: Dynamic, height: Dynamic| -> FnResult<()> {
        let (width, height) = (dimension(&width)?, dimension(&height)?);
        check_dimensions(i64::from(width), i64::from(height)).map_err(engine_error)?;
        let command = DrawCommand::SetSize { width, height };
        push(&b, command);
        Ok(())
    });
    let b = Rc::clone(bridge);
    engine.register_fn("get_size", move || {
        let size = b.borrow().canvas_size();
        let mut map = Map::new();
        map.insert("width".into(), Dynamic::from_int(size.width as INT));
        map.insert("height".into(), Dynamic::from_int(size.height as INT));
        map
    });
    let b = Rc::clone(bridge);
    engine.register_fn("get_width", move || b.borrow().canvas_size().width as INT);
    let b = Rc::clone(bridge);
    engine.register_fn("get_height", move || b.borrow().canvas_size().height as INT);
}

pub(crate) fn register_paint(engine: &mut Engine, bridge: &SharedBridge) {
    command0(engine, bridge, "clear", DrawCommand::Clear);
    let b = Rc::clone(bridge);
    engine.register_fn("set_color", move |r: Dynamic, g: Dynamic, bl: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::SetColor { color: color(&r, &g, &bl, None)? });
        Ok(())
    });
    let b = Rc::clone(bridge);
    engine.register_fn("set_color", move |r: Dynamic, g: Dynamic, bl: Dynamic, a: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::SetColor { color: color(&r, &g, &bl, Some(&a))? });
        Ok(())
    });
    command1(engine, bridge, "set_line_width", |width| DrawCommand::SetLineWidth { width });
    command1(engine, bridge, "set_font_size", |size| DrawCommand::SetFontSize { size });
    let b = Rc::clone(bridge);
    engine.register_fn("set_font_family", move |family: &str| {
        push(&b, DrawCommand::SetFontFamily { family: family.to_string() });
    });

    let b = Rc::clone(bridge);
    engine.register_fn("get_text_width", move |text: Dynamic| b.borrow_mut().measure_text(&text.to_string(), None));
    let b = Rc::clone(bridge);
    engine.register_fn("get_text_width", move |text: Dynamic, size: Dynamic| -> FnResult<f64> {
        let size = num(&size)?;
        Ok(b.borrow_mut().measure_text(&text.to_string(), Some(size)))
    });

    let b = Rc::clone(bridge);
    engine.register_fn(
        "set_fill_linear_gradient",
        move |x0: Dynamic, y0: Dynamic, x1: Dynamic, y1: Dynamic, stops: Array| -> FnResult<()> {
            let paint = Paint::LinearGradient {
                x0: num(&x0)?,
                y0: num(&y0)?,
                x1: num(&x1)?,
                y1: num(&y1)?,
                stops: color_stops(&stops)?,
            };
            push(&b, DrawCommand::SetFillStyle { paint });
            Ok(())
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn(
        "set_stroke_linear_gradient",
        move |x0: Dynamic, y0: Dynamic, x1: Dynamic, y1: Dynamic, stops: Array| -> FnResult<()> {
            let paint = Paint::LinearGradient {
                x0: num(&x0)?,
                y0: num(&y0)?,
                x1: num(&x1)?,
                y1: num(&y1)?,
                stops: color_stops(&stops)?,
            };
            push(&b, DrawCommand::SetStrokeStyle { paint });
            Ok(())
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn(
        "set_fill_radial_gradient",
        move |x0: Dynamic,
              y0: Dynamic,
              r0: Dynamic,
              x1: Dynamic,
              y1: Dynamic,
              r1: Dynamic,
              stops: Array|
              -> FnResult<()> {
            let paint = Paint::RadialGradient {
                x0: num(&x0)?,
                y0: num(&y0)?,
                r0: num(&r0)?,
                x1: num(&x1)?,
                y1: num(&y1)?,
                r1: num(&r1)?,
                stops: color_stops(&stops)?,
            };
            push(&b, DrawCommand::SetFillStyle { paint });
            Ok(())
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn(
        "set_fill_conic_gradient",
        move |start_angle: Dynamic, x: Dynamic, y: Dynamic, stops: Array| -> FnResult<()> {
            let paint = Paint::ConicGradient {
                start_angle: num(&start_angle)?,
                x: num(&x)?,
                y: num(&y)?,
                stops: color_stops(&stops)?,
            };
            push(&b, DrawCommand::SetFillStyle { paint });
            Ok(())
        },
    );
}

fn arc_command(
    x: &Dynamic,
    y: &Dynamic,
    radius: &Dynamic,
    start: &Dynamic,
    end: &Dynamic,
    counterclockwise: bool,
) -> FnResult<DrawCommand> {
    Ok(DrawCommand::Arc {
        x: num(x)?,
        y: num(y)?,
        radius: num(radius)?,
        start_angle: num(start)?,
        end_angle: num(end)?,
        counterclockwise,
    })
}

/// `[x, y, radius_x, radius_y, rotation, start_angle, end_angle]`
fn ellipse_command(args: [&Dynamic; 7], counterclockwise: bool) -> FnResult<DrawCommand> {
    let [x, y, rx, ry, rotation, start, end] = args;
    Ok(DrawCommand::Ellipse {
        x: num(x)?,
        y: num(y)?,
        radius_x: num(rx)?,
        radius_y: num(ry)?,
        rotation: num(rotation)?,
        start_angle: num(start)?,
        end_angle: num(end)?,
        counterclockwise,
    })
}

pub(crate) fn register_shapes(engine: &mut Engine, bridge: &SharedBridge) {
    command4(engine, bridge, "rect", |x, y, width, height| DrawCommand::Rect { x, y, width, height });
    command4(engine, bridge, "fill_rect", |x, y, width, height| DrawCommand::FillRect { x, y, width, height });
    command3(engine, bridge, "circle", |x, y, radius| DrawCommand::Circle { x, y, radius });
    command3(engine, bridge, "fill_circle", |x, y, radius| DrawCommand::FillCircle { x, y, radius });
    command4(engine, bridge, "line", |x1, y1, x2, y2| DrawCommand::Line { x1, y1, x2, y2 });
    command0(engine, bridge, "begin_path", DrawCommand::BeginPath);
    command0(engine, bridge, "close_path", DrawCommand::ClosePath);
    command2(engine, bridge, "move_to", |x, y| DrawCommand::MoveTo { x, y });
    command2(engine, bridge, "line_to", |x, y| DrawCommand::LineTo { x, y });
    command6(engine, bridge, "bezier_curve_to", |cp1x, cp1y, cp2x, cp2y, x, y| DrawCommand::BezierCurveTo {
        cp1x,
        cp1y,
        cp2x,
        cp2y,
        x,
        y,
    });
    command4(engine, bridge, "quadratic_curve_to", |cpx, cpy, x, y| DrawCommand::QuadraticCurveTo { cpx, cpy, x, y });
    command0(engine, bridge, "fill", DrawCommand::Fill);
    command0(engine, bridge, "stroke", DrawCommand::Stroke);
    command0(engine, bridge, "clip", DrawCommand::Clip);

    let b = Rc::clone(bridge);
    engine.register_fn(
        "arc",
        move |x: Dynamic, y: Dynamic, radius: Dynamic, start: Dynamic, end: Dynamic| -> FnResult<()> {
            push(&b, arc_command(&x, &y, &radius, &start, &end, false)?);
            Ok(())
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn(
        "arc",
        move |x: Dynamic, y: Dynamic, radius: Dynamic, start: Dynamic, end: Dynamic, ccw: bool| -> FnResult<()> {
            push(&b, arc_command(&x, &y, &radius, &start, &end, ccw)?);
            Ok(())
        },
    );

    let b = Rc::clone(bridge);
    engine.register_fn(
        "ellipse",
        move |x: Dynamic,
              y: Dynamic,
              rx: Dynamic,
              ry: Dynamic,
              rotation: Dynamic,
              start: Dynamic,
              end: Dynamic|
              -> FnResult<()> {
            push(&b, ellipse_command([&x, &y, &rx, &ry, &rotation, &start, &end], false)?);
            Ok(())
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn(
        "ellipse",
        move |x: Dynamic,
              y: Dynamic,
              rx: Dynamic,
              ry: Dynamic,
              rotation: Dynamic,
              start: Dynamic,
              end: Dynamic,
              ccw: bool|
              -> FnResult<()> {
            push(&b, ellipse_command([&x, &y, &rx, &ry, &rotation, &start, &end], ccw)?);
            Ok(())
        },
    );

    let b = Rc::clone(bridge);
    engine.register_fn(
        "round_rect",
        move |x: Dynamic, y: Dynamic, width: Dynamic, height: Dynamic, radius: Dynamic| -> FnResult<()> {
            let command = DrawCommand::RoundRect {
                x: num(&x)?,
                y: num(&y)?,
                width: num(&width)?,
                height: num(&height)?,
                radius: num(&radius)?,
            };
            push(&b, command);
            Ok(())
        },
    );
}

fn text_command(
    stroke: bool,
    x: &Dynamic,
    y: &Dynamic,
    text: &Dynamic,
    size: Option<&Dynamic>,
    family: Option<&Dynamic>,
    max_width: Option<&Dynamic>,
) -> FnResult<DrawCommand> {
    let (x, y, text) = (num(x)?, num(y)?, text.to_string());
    let size = size.map(num).transpose()?;
    let family = family.map(|f| f.to_string());
    let max_width = max_width.map(num).transpose()?;
    Ok(if stroke {
        DrawCommand::StrokeText { x, y, text, size, family, max_width }
    } else {
        DrawCommand::Text { x, y, text, size, family, max_width }
    })
}

pub(crate) fn register_text(engine: &mut Engine, bridge: &SharedBridge) {
    for (name, stroke) in [("text", false), ("stroke_text", true)] {
        let b = Rc::clone(bridge);
        engine.register_fn(name, move |x: Dynamic, y: Dynamic, s: Dynamic| -> FnResult<()> {
            push(&b, text_command(stroke, &x, &y, &s, None, None, None)?);
            Ok(())
        });
        let b = Rc::clone(bridge);
        engine.register_fn(name, move |x: Dynamic, y: Dynamic, s: Dynamic, size: Dynamic| -> FnResult<()> {
            push(&b, text_command(stroke, &x, &y, &s, Some(&size), None, None)?);
            Ok(())
        });
        let b = Rc::clone(bridge);
        engine.register_fn(
            name,
            move |x: Dynamic, y: Dynamic, s: Dynamic, size: Dynamic, family: Dynamic| -> FnResult<()> {
                push(&b, text_command(stroke, &x, &y, &s, Some(&size), Some(&family), None)?);
                Ok(())
            },
        );
        let b = Rc::clone(bridge);
        engine.register_fn(
            name,
            move |x: Dynamic, y: Dynamic, s: Dynamic, size: Dynamic, family: Dynamic, max_width: Dynamic| -> FnResult<()> {
                push(&b, text_command(stroke, &x, &y, &s, Some(&size), Some(&family), Some(&max_width))?);
                Ok(())
            },
        );
    }
}

pub(crate) fn register_transforms(engine: &mut Engine, bridge: &SharedBridge) {
    command2(engine, bridge, "translate", |x, y| DrawCommand::Translate { x, y });
    command1(engine, bridge, "rotate", |angle| DrawCommand::Rotate { angle });
    command2(engine, bridge, "scale", |x, y| DrawCommand::Scale { x, y });
    command6(engine, bridge, "transform", |a, b, c, d, e, f| DrawCommand::Transform { a, b, c, d, e, f });
    command6(engine, bridge, "set_transform", |a, b, c, d, e, f| DrawCommand::SetTransform { a, b, c, d, e, f });
    command0(engine, bridge, "reset_transform", DrawCommand::ResetTransform);
    command0(engine, bridge, "save", DrawCommand::Save);
    command0(engine, bridge, "restore", DrawCommand::Restore);
}

pub(crate) fn register_timing_and_input(engine: &mut Engine, bridge: &SharedBridge) {
    let b = Rc::clone(bridge);
    engine.register_fn("delta_time", move || b.borrow().frame_context().timing.delta_time);
    let b = Rc::clone(bridge);
    engine.register_fn("total_time", move || b.borrow().frame_context().timing.total_time);

    let b = Rc::clone(bridge);
    engine.register_fn("is_key_down", move |key: &str| b.borrow().frame_context().input.is_key_down(key));
    let b = Rc::clone(bridge);
    engine.register_fn("is_key_pressed", move |key: &str| b.borrow().frame_context().input.is_key_pressed(key));
    let b = Rc::clone(bridge);
    engine.register_fn("get_keys_down", move || -> Array {
        b.borrow().frame_context().input.keys_down.iter().map(|key| Dynamic::from(key.clone())).collect()
    });
    let b = Rc::clone(bridge);
    engine.register_fn("get_keys_pressed", move || -> Array {
        b.borrow().frame_context().input.keys_pressed.iter().map(|key| Dynamic::from(key.clone())).collect()
    });

    let b = Rc::clone(bridge);
    engine.register_fn("mouse_x", move || b.borrow().frame_context().input.mouse_x);
    let b = Rc::clone(bridge);
    engine.register_fn("mouse_y", move || b.borrow().frame_context().input.mouse_y);
    let b = Rc::clone(bridge);
    engine.register_fn("is_mouse_down", move |button: INT| {
        u8::try_from(button).is_ok_and(|button| b.borrow().frame_context().input.mouse_buttons_down.contains(&button))
    });
    let b = Rc::clone(bridge);
    engine.register_fn("is_mouse_pressed", move |button: INT| {
        u8::try_from(button)
            .is_ok_and(|button| b.borrow().frame_context().input.mouse_buttons_pressed.contains(&button))
    });

    let b = Rc::clone(bridge);
    engine.register_fn("gamepad_count", move || b.borrow().frame_context().input.gamepad_count() as INT);
    let b = Rc::clone(bridge);
    engine.register_fn("is_gamepad_connected", move |index: INT| {
        usize::try_from(index).is_ok_and(|index| b.borrow().frame_context().input.gamepad(index).is_some())
    });
    let b = Rc::clone(bridge);
    engine.register_fn("gamepad_button", move |index: INT, button: INT| -> f64 {
        let bridge = b.borrow();
        let pad = usize::try_from(index).ok().and_then(|index| bridge.frame_context().input.gamepad(index));
        let value = pad.zip(usize::try_from(button).ok()).and_then(|(pad, button)| pad.buttons.get(button).copied());
        f64::from(value.unwrap_or(0.0))
    });
    let b = Rc::clone(bridge);
    engine.register_fn("is_gamepad_button_pressed", move |index: INT, button: INT| -> bool {
        let bridge = b.borrow();
        let pad = usize::try_from(index).ok().and_then(|index| bridge.frame_context().input.gamepad(index));
        let pressed = match (pad, u32::try_from(button)) {
            (Some(pad), Ok(button)) => pad.buttons_pressed.contains(&button),
            _ => false,
        };
        pressed
    });
    let b = Rc::clone(bridge);
    engine.register_fn("gamepad_axis", move |index: INT, axis: INT| -> f64 {
        let bridge = b.borrow();
        let pad = usize::try_from(index).ok().and_then(|index| bridge.frame_context().input.gamepad(index));
        let value = pad.zip(usize::try_from(axis).ok()).and_then(|(pad, axis)| pad.axes.get(axis).copied());
        f64::from(value.unwrap_or(0.0))
    });
}

pub(crate) fn register_pixels(engine: &mut Engine, bridge: &SharedBridge) {
    engine.register_type_with_name::<PixelBuffer>("ImageData");
    engine.register_get("width", |buffer: &mut PixelBuffer| buffer.width() as INT);
    engine.register_get("height", |buffer: &mut PixelBuffer| buffer.height() as INT);
    engine.register_fn("get_pixel", |buffer: &mut PixelBuffer, x: Dynamic, y: Dynamic| -> FnResult<Map> {
        let [r, g, bl, a] = buffer.get_pixel(int(&x)?, int(&y)?);
        let mut map = Map::new();
        map.insert("r".into(), Dynamic::from_int(r as INT));
        map.insert("g".into(), Dynamic::from_int(g as INT));
        map.insert("b".into(), Dynamic::from_int(bl as INT));
        map.insert("a".into(), Dynamic::from_int(a as INT));
        Ok(map)
    });
    engine.register_fn(
        "set_pixel",
        |buffer: &mut PixelBuffer, x: Dynamic, y: Dynamic, r: Dynamic, g: Dynamic, bl: Dynamic, a: Dynamic| -> FnResult<()> {
            let rgba = color(&r, &g, &bl, Some(&a))?.to_rgba();
            buffer.set_pixel(int(&x)?, int(&y)?, rgba);
            Ok(())
        },
    );

    engine.register_fn("create_image_data", |width: Dynamic, height: Dynamic| -> FnResult<PixelBuffer> {
        create_image_data(dimension(&width)?, dimension(&height)?).map_err(engine_error)
    });
    let b = Rc::clone(bridge);
    engine.register_fn(
        "get_image_data",
        move |x: Dynamic, y: Dynamic, width: Dynamic, height: Dynamic| -> FnResult<Dynamic> {
            let (width, height) = (int(&width)?, int(&height)?);
            if width <= 0 || height <= 0 {
                return Ok(Dynamic::UNIT);
            }
            check_dimensions(width, height).map_err(engine_error)?;
            let region = PixelRegion::new(int(&x)?, int(&y)?, width as u32, height as u32);
            let buffer = b.borrow_mut().get_image_data(region).map_err(engine_error)?;
            Ok(buffer.map_or(Dynamic::UNIT, Dynamic::from))
        },
    );
    let b = Rc::clone(bridge);
    engine.register_fn("put_image_data", move |buffer: PixelBuffer, dx: Dynamic, dy: Dynamic| -> FnResult<()> {
        let command = DrawCommand::PutImageData {
            x: int(&dx)?,
            y: int(&dy)?,
            width: buffer.width(),
            height: buffer.height(),
            data: buffer.into_data(),
        };
        push(&b, command);
        Ok(())
    });
}

fn handles_to_array(handles: Vec<AssetHandle>) -> Array {
    handles.into_iter().map(Dynamic::from).collect()
}

pub(crate) fn register_assets(engine: &mut Engine, bridge: &SharedBridge) {
    engine.register_type_with_name::<AssetHandle>("AssetHandle");
    engine.register_get("name", |handle: &mut AssetHandle| handle.name().to_string());
    engine.register_get("kind", |handle: &mut AssetHandle| handle.kind().label().to_string());
    engine.register_get("source_file", |handle: &mut AssetHandle| handle.source_file().to_string());
    engine.register_fn("to_string", |handle: &mut AssetHandle| format!("{}:{}", handle.kind(), handle.name()));

    let mut module = Module::new();
    let b = Rc::clone(bridge);
    module.set_native_fn("add_path", move |dir: &str| -> FnResult<Array> {
        let handles = b.borrow_mut().add_path(dir).map_err(engine_error)?;
        Ok(handles_to_array(handles))
    });
    engine.register_static_module("assets", module.into());

    for (name, kind) in [
        ("load_image", AssetKind::Image),
        ("load_font", AssetKind::Font),
        ("load_sound", AssetKind::Sound),
        ("load_music", AssetKind::Music),
    ] {
        let b = Rc::clone(bridge);
        engine.register_fn(name, move |asset_name: &str, file: &str| -> FnResult<AssetHandle> {
            let definition = AssetDefinition::new(asset_name, file, kind);
            b.borrow_mut().register_asset(&definition).map_err(engine_error)
        });
    }

    let b = Rc::clone(bridge);
    engine.register_fn("get_asset_width", move |asset: Dynamic| -> FnResult<Dynamic> {
        let (width, _) = b.borrow().asset_dimensions(&asset_ref(&asset)?).map_err(engine_error)?;
        Ok(width.map_or(Dynamic::UNIT, |w| Dynamic::from_int(w as INT)))
    });
    let b = Rc::clone(bridge);
    engine.register_fn("get_asset_height", move |asset: Dynamic| -> FnResult<Dynamic> {
        let (_, height) = b.borrow().asset_dimensions(&asset_ref(&asset)?).map_err(engine_error)?;
        Ok(height.map_or(Dynamic::UNIT, |h| Dynamic::from_int(h as INT)))
    });

    let b = Rc::clone(bridge);
    let draw_image = move |asset: &Dynamic, x: &Dynamic, y: &Dynamic, size: Option<(&Dynamic, &Dynamic)>| -> FnResult<()> {
        let reference = asset_ref(asset)?;
        let name = b.borrow().resolve_asset(&reference).map_err(engine_error)?.name().to_string();
        let (width, height) = match size {
            Some((w, h)) => (Some(num(w)?), Some(num(h)?)),
            None => (None, None),
        };
        push(&b, DrawCommand::DrawImage { asset: name, x: num(x)?, y: num(y)?, width, height });
        Ok(())
    };
    let draw = Rc::new(draw_image);
    let d = Rc::clone(&draw);
    engine.register_fn("draw_image", move |asset: Dynamic, x: Dynamic, y: Dynamic| d(&asset, &x, &y, None));
    let d = Rc::clone(&draw);
    engine.register_fn(
        "draw_image",
        move |asset: Dynamic, x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| d(&asset, &x, &y, Some((&w, &h))),
    );
}

pub(crate) fn register_audio(engine: &mut Engine, bridge: &SharedBridge) {
    let resolve = {
        let b = Rc::clone(bridge);
        Rc::new(move |asset: &Dynamic| -> FnResult<String> {
            let reference = asset_ref(asset)?;
            let name = b.borrow().resolve_asset(&reference).map_err(engine_error)?.name().to_string();
            Ok(name)
        })
    };

    let (b, r) = (Rc::clone(bridge), Rc::clone(&resolve));
    engine.register_fn("play_sound", move |asset: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::PlaySound { asset: r(&asset)?, volume: None });
        Ok(())
    });
    let (b, r) = (Rc::clone(bridge), Rc::clone(&resolve));
    engine.register_fn("play_sound", move |asset: Dynamic, vol: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::PlaySound { asset: r(&asset)?, volume: Some(volume(&vol)?) });
        Ok(())
    });
    let (b, r) = (Rc::clone(bridge), Rc::clone(&resolve));
    engine.register_fn("play_music", move |asset: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::PlayMusic { asset: r(&asset)?, volume: None, looped: true });
        Ok(())
    });
    let (b, r) = (Rc::clone(bridge), Rc::clone(&resolve));
    engine.register_fn("play_music", move |asset: Dynamic, vol: Dynamic| -> FnResult<()> {
        push(&b, DrawCommand::PlayMusic { asset: r(&asset)?, volume: Some(volume(&vol)?), looped: true });
        Ok(())
    });
    let (b, r) = (Rc::clone(bridge), Rc::clone(&resolve));
    engine.register_fn("play_music", move |asset: Dynamic, vol: Dynamic, looped: bool| -> FnResult<()> {
        push(&b, DrawCommand::PlayMusic { asset: r(&asset)?, volume: Some(volume(&vol)?), looped });
        Ok(())
    });

    command0(engine, bridge, "stop_music", DrawCommand::StopMusic);
    command0(engine, bridge, "pause_music", DrawCommand::PauseMusic);
    command0(engine, bridge, "resume_music", DrawCommand::ResumeMusic);
    command0(engine, bridge, "mute", DrawCommand::Mute);
    command0(engine, bridge, "unmute", DrawCommand::Unmute);
    command1(engine, bridge, "set_music_volume", |v| DrawCommand::SetMusicVolume { volume: v as f32 });
    command1(engine, bridge, "set_master_volume", |v| DrawCommand::SetMasterVolume { volume: v as f32 });

    let b = Rc::clone(bridge);
    engine.register_fn("is_muted", move || b.borrow().frame_context().audio.muted);
    let b = Rc::clone(bridge);
    engine.register_fn("get_master_volume", move || b.borrow().frame_context().audio.master_volume as f64);
    let b = Rc::clone(bridge);
    engine.register_fn("is_music_playing", move || b.borrow().frame_context().audio.music_playing);
    let b = Rc::clone(bridge);
    engine.register_fn("get_music_time", move || b.borrow().frame_context().audio.music_time);
    let b = Rc::clone(bridge);
    engine.register_fn("get_music_duration", move || b.borrow().frame_context().audio.music_duration);
    let b = Rc::clone(bridge);
    engine.register_fn("get_current_music_name", move || -> Dynamic {
        match &b.borrow().frame_context().audio.current_music {
            Some(name) => Dynamic::from(name.clone()),
            None => Dynamic::UNIT,
        }
    });
}
