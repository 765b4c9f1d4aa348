use anyhow::{bail, Result};
use cgmath::Matrix4;
use std::ffi::c_void;

use super::scene::RenderBackend;

// Four vertices per face so every face gets a flat color.
#[rustfmt::skip]
const POSITIONS: [f32; 72] = [
    // front (+z)
    -0.5, -0.5,  0.5,   0.5, -0.5,  0.5,   0.5,  0.5,  0.5,  -0.5,  0.5,  0.5,
    // back (-z)
     0.5, -0.5, -0.5,  -0.5, -0.5, -0.5,  -0.5,  0.5, -0.5,   0.5,  0.5, -0.5,
    // left (-x)
    -0.5, -0.5, -0.5,  -0.5, -0.5,  0.5,  -0.5,  0.5,  0.5,  -0.5,  0.5, -0.5,
    // right (+x)
     0.5, -0.5,  0.5,   0.5, -0.5, -0.5,   0.5,  0.5, -0.5,   0.5,  0.5,  0.5,
    // top (+y)
    -0.5,  0.5,  0.5,   0.5,  0.5,  0.5,   0.5,  0.5, -0.5,  -0.5,  0.5, -0.5,
    // bottom (-y)
    -0.5, -0.5, -0.5,   0.5, -0.5, -0.5,   0.5, -0.5,  0.5,  -0.5, -0.5,  0.5,
];

const FACES: usize = 6;
const VERTICES_PER_FACE: usize = 4;
const INDEX_COUNT: usize = FACES * 6;

const DEFAULT_PALETTE: [[f32; 4]; FACES] = [
    [0.96, 0.26, 0.21, 1.0],
    [0.13, 0.59, 0.95, 1.0],
    [0.30, 0.69, 0.31, 1.0],
    [1.00, 0.76, 0.03, 1.0],
    [0.61, 0.15, 0.69, 1.0],
    [0.00, 0.74, 0.83, 1.0],
];

const ALTERNATE_PALETTE: [[f32; 4]; FACES] = [
    [1.00, 0.60, 0.00, 0.9],
    [1.00, 0.92, 0.23, 0.9],
    [0.91, 0.12, 0.39, 0.9],
    [0.55, 0.76, 0.29, 0.9],
    [0.25, 0.32, 0.71, 0.9],
    [0.47, 0.33, 0.28, 0.9],
];

const VERTEX_SHADER: &str = r#"
    #version 100
    uniform mat4 u_mvp;
    attribute vec3 a_position;
    attribute vec4 a_color;
    varying vec4 v_color;
    void main() {
        gl_Position = u_mvp * vec4(a_position, 1.0);
        v_color = a_color;
    }
"#;

const FRAGMENT_SHADER: &str = r#"
    #version 100
    precision mediump float;
    varying vec4 v_color;
    void main() {
        gl_FragColor = v_color;
    }
"#;

/// Expand a per-face palette into one RGBA entry per vertex.
fn vertex_colors(palette: &[[f32; 4]; FACES]) -> Vec<f32> {
    palette
        .iter()
        .flat_map(|color| std::iter::repeat(color).take(VERTICES_PER_FACE))
        .flatten()
        .copied()
        .collect()
}

/// Two triangles per face.
fn indices() -> Vec<u16> {
    (0..FACES as u16)
        .flat_map(|face| {
            let base = face * VERTICES_PER_FACE as u16;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect()
}

/// GL objects of the cube. Owned by the renderer, deleted through
/// [`RenderBackend::destroy_mesh`].
#[derive(Debug)]
pub struct GlCube {
    program: u32,
    positions: u32,
    colors: u32,
    alternate_colors: u32,
    indices: u32,
    position_loc: u32,
    color_loc: u32,
    mvp_loc: i32,
}

/// OpenGL ES 2.0 backend. The GL function pointers must already be loaded
/// and a context current on this thread.
pub struct GlBackend;

impl GlBackend {
    pub fn new() -> Self {
        Self
    }
}

unsafe fn compile_shader(shader_type: u32, source: &str) -> Result<u32> {
    let shader = gl::CreateShader(shader_type);
    let source_ptr: *const gl::types::GLchar = source.as_ptr().cast();
    let source_len = source.len() as i32;
    gl::ShaderSource(shader, 1, &source_ptr, &source_len);
    gl::CompileShader(shader);

    let mut status = 0;
    gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
    if status == 0 {
        let mut len = 0;
        gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        gl::GetShaderInfoLog(shader, len, std::ptr::null_mut(), buf.as_mut_ptr().cast());
        gl::DeleteShader(shader);
        bail!("Shader compile error: {}", String::from_utf8_lossy(&buf));
    }

    Ok(shader)
}

unsafe fn link_program(vs: u32, fs: u32) -> Result<u32> {
    let program = gl::CreateProgram();
    gl::AttachShader(program, vs);
    gl::AttachShader(program, fs);
    gl::LinkProgram(program);
    gl::DeleteShader(vs);
    gl::DeleteShader(fs);

    let mut status = 0;
    gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
    if status == 0 {
        let mut len = 0;
        gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        gl::GetProgramInfoLog(program, len, std::ptr::null_mut(), buf.as_mut_ptr().cast());
        gl::DeleteProgram(program);
        bail!("Failed to link shader program: {}", String::from_utf8_lossy(&buf));
    }

    Ok(program)
}

unsafe fn upload<T>(target: u32, data: &[T]) -> u32 {
    let mut buffer = 0;
    gl::GenBuffers(1, &mut buffer);
    gl::BindBuffer(target, buffer);
    gl::BufferData(
        target,
        std::mem::size_of_val(data) as isize,
        data.as_ptr() as *const c_void,
        gl::STATIC_DRAW,
    );
    buffer
}

impl RenderBackend for GlBackend {
    type Mesh = GlCube;

    fn configure(&mut self) {
        unsafe {
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);

            gl::Enable(gl::DEPTH_TEST);
            gl::DepthFunc(gl::LEQUAL);

            gl::Enable(gl::BLEND);
            gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
        }
    }

    fn create_mesh(&mut self) -> Result<GlCube> {
        unsafe {
            let vs = compile_shader(gl::VERTEX_SHADER, VERTEX_SHADER)?;
            let fs = match compile_shader(gl::FRAGMENT_SHADER, FRAGMENT_SHADER) {
                Ok(fs) => fs,
                Err(e) => {
                    gl::DeleteShader(vs);
                    return Err(e);
                }
            };
            let program = link_program(vs, fs)?;

            let position_loc = gl::GetAttribLocation(program, b"a_position\0".as_ptr().cast());
            let color_loc = gl::GetAttribLocation(program, b"a_color\0".as_ptr().cast());
            let mvp_loc = gl::GetUniformLocation(program, b"u_mvp\0".as_ptr().cast());
            if position_loc < 0 || color_loc < 0 || mvp_loc < 0 {
                gl::DeleteProgram(program);
                bail!("Cube shader is missing an attribute or uniform");
            }

            let cube = GlCube {
                program,
                positions: upload(gl::ARRAY_BUFFER, &POSITIONS),
                colors: upload(gl::ARRAY_BUFFER, &vertex_colors(&DEFAULT_PALETTE)),
                alternate_colors: upload(gl::ARRAY_BUFFER, &vertex_colors(&ALTERNATE_PALETTE)),
                indices: upload(gl::ELEMENT_ARRAY_BUFFER, &indices()),
                position_loc: position_loc as u32,
                color_loc: color_loc as u32,
                mvp_loc,
            };
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
            gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, 0);

            log::debug!("Created cube mesh {:?}", cube);
            Ok(cube)
        }
    }

    fn destroy_mesh(&mut self, mesh: GlCube) {
        unsafe {
            let buffers = [
                mesh.positions,
                mesh.colors,
                mesh.alternate_colors,
                mesh.indices,
            ];
            gl::DeleteBuffers(buffers.len() as i32, buffers.as_ptr());
            gl::DeleteProgram(mesh.program);
        }
    }

    fn viewport(&mut self, width: i32, height: i32) {
        unsafe {
            gl::Viewport(0, 0, width, height);
        }
    }

    fn clear(&mut self) {
        unsafe {
            gl::Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
        }
    }

    fn draw(&mut self, mesh: &GlCube, mvp: &Matrix4<f32>, alternate_colors: bool) {
        let matrix: &[f32; 16] = mvp.as_ref();
        let colors = if alternate_colors {
            mesh.alternate_colors
        } else {
            mesh.colors
        };

        unsafe {
            gl::UseProgram(mesh.program);
            gl::UniformMatrix4fv(mesh.mvp_loc, 1, gl::FALSE, matrix.as_ptr());

            gl::BindBuffer(gl::ARRAY_BUFFER, mesh.positions);
            gl::EnableVertexAttribArray(mesh.position_loc);
            gl::VertexAttribPointer(mesh.position_loc, 3, gl::FLOAT, gl::FALSE, 0, std::ptr::null());

            gl::BindBuffer(gl::ARRAY_BUFFER, colors);
            gl::EnableVertexAttribArray(mesh.color_loc);
            gl::VertexAttribPointer(mesh.color_loc, 4, gl::FLOAT, gl::FALSE, 0, std::ptr::null());

            gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, mesh.indices);
            gl::DrawElements(
                gl::TRIANGLES,
                INDEX_COUNT as i32,
                gl::UNSIGNED_SHORT,
                std::ptr::null(),
            );

            gl::DisableVertexAttribArray(mesh.position_loc);
            gl::DisableVertexAttribArray(mesh.color_loc);
        }
    }
}
